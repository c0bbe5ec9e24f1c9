use newsgate::auth::Role;
use newsgate::models::{NewArticle, NewComment, NewUser, SubscriptionUpdate};
use newsgate::repo::inmem::InMemRepo;
use newsgate::repo::{ArticleRepo, CommentRepo, RepoError, UserRepo};

fn article(title: &str) -> NewArticle {
    NewArticle {
        title: title.into(),
        content: "body".into(),
        excerpt: "ex".into(),
        image_url: Some("https://img.example/1.png".into()),
        is_premium: true,
        published: true,
        category: None,
    }
}

#[actix_rt::test]
async fn snapshot_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("state.json");

    let (user_id, article_id, comment_id) = {
        let repo = InMemRepo::at(&path);
        let user = repo
            .create_user(NewUser { email: "reader@example.com".into(), password_hash: "h".into(), role: Role::User })
            .await
            .unwrap();
        let a = repo.create_article(user.id, article("kept")).await.unwrap();
        let c = repo
            .create_comment(a.id, user.id, NewComment { content: "first!".into(), parent_id: None })
            .await
            .unwrap();
        repo.update_subscription(SubscriptionUpdate {
            user_id: user.id,
            is_subscribed: true,
            customer_id: Some("cus".into()),
            subscription_id: Some("sub".into()),
            status: Some("active".into()),
        })
        .await
        .unwrap();
        (user.id, a.id, c.id)
    };
    assert!(path.exists());

    let reloaded = InMemRepo::at(&path);
    let user = reloaded.get_user(user_id).await.unwrap();
    assert!(user.is_subscribed);
    assert_eq!(user.role, Role::User);
    let a = reloaded.get_article(article_id).await.unwrap();
    assert_eq!(a.title, "kept");
    assert_eq!(a.category, "Technology");
    assert_eq!(a.author_email.as_deref(), Some("reader@example.com"));
    assert_eq!(reloaded.get_comment(comment_id).await.unwrap().content, "first!");

    // ids keep counting up after a reload
    let b = reloaded.create_article(user_id, article("next")).await.unwrap();
    assert!(b.id > comment_id);
}

#[actix_rt::test]
async fn corrupt_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, b"{ definitely not json").unwrap();

    let repo = InMemRepo::at(&path);
    assert!(matches!(repo.get_user(1).await, Err(RepoError::NotFound)));
    assert!(repo.list_all_articles().await.unwrap().is_empty());
}

#[actix_rt::test]
async fn partial_update_keeps_other_fields() {
    let repo = InMemRepo::ephemeral();
    let user = repo
        .create_user(NewUser { email: "ed@example.com".into(), password_hash: "h".into(), role: Role::Admin })
        .await
        .unwrap();
    let a = repo.create_article(user.id, article("before")).await.unwrap();
    let upd = newsgate::models::UpdateArticle { published: Some(false), ..Default::default() };
    let b = repo.update_article(a.id, upd).await.unwrap();
    assert!(!b.published);
    assert_eq!(b.title, "before");
    assert_eq!(b.image_url, a.image_url);
    let upd = newsgate::models::UpdateArticle { image_url: Some(None), ..Default::default() };
    let c = repo.update_article(a.id, upd).await.unwrap();
    assert_eq!(c.image_url, None);
    assert!(matches!(
        repo.update_article(a.id + 100, Default::default()).await,
        Err(RepoError::NotFound)
    ));
}

#[actix_rt::test]
async fn comment_on_missing_article_is_not_found() {
    let repo = InMemRepo::ephemeral();
    let err = repo
        .create_comment(5, 1, NewComment { content: "x".into(), parent_id: None })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
    assert!(matches!(
        repo.update_subscription(SubscriptionUpdate {
            user_id: 5,
            is_subscribed: true,
            customer_id: None,
            subscription_id: None,
            status: None,
        })
        .await,
        Err(RepoError::NotFound)
    ));
}
