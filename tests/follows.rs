#![cfg(feature = "inmem-store")]

#[macro_use]
mod common;

use actix_web::test;
use blogfeed::repo::FollowRepo;
use common::{fixture, location};

#[actix_web::test]
async fn follow_and_unfollow() {
    let fx = fixture();
    let reader = fx.user("reader").await;
    let writer = fx.user("writer").await;
    let app = app!(fx);

    let req = test::TestRequest::post().uri("/writer/follow/").cookie(fx.session(&reader)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(location(&resp), "/writer/");
    assert!(fx.repo.is_following(reader.id, writer.id).await.unwrap());

    // following twice keeps a single edge
    let req = test::TestRequest::get().uri("/writer/follow/").cookie(fx.session(&reader)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 302);
    assert_eq!(fx.repo.follow_stats(writer.id).await.unwrap().followers, 1);

    let profile = test::call_and_read_body(
        &app,
        test::TestRequest::get().uri("/writer/").cookie(fx.session(&reader)).to_request(),
    )
    .await;
    assert!(String::from_utf8_lossy(&profile).contains("/writer/unfollow/"));

    let req = test::TestRequest::post().uri("/writer/unfollow/").cookie(fx.session(&reader)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(location(&resp), "/writer/");
    assert!(!fx.repo.is_following(reader.id, writer.id).await.unwrap());

    // unfollowing without an edge is a no-op
    let req = test::TestRequest::post().uri("/writer/unfollow/").cookie(fx.session(&reader)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(fx.repo.follow_stats(writer.id).await.unwrap().followers, 0);
}

#[actix_web::test]
async fn self_follow_is_ignored() {
    let fx = fixture();
    let solo = fx.user("solo").await;
    let app = app!(fx);

    let req = test::TestRequest::post().uri("/solo/follow/").cookie(fx.session(&solo)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(location(&resp), "/solo/");
    assert_eq!(fx.repo.follow_stats(solo.id).await.unwrap().following, 0);
}

#[actix_web::test]
async fn follow_needs_login_and_a_real_author() {
    let fx = fixture();
    let reader = fx.user("reader").await;
    fx.user("writer").await;
    let app = app!(fx);

    let resp = test::call_service(&app, test::TestRequest::post().uri("/writer/follow/").to_request()).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(location(&resp), "/auth/login/?next=/writer/follow/");

    let req = test::TestRequest::post().uri("/ghost/follow/").cookie(fx.session(&reader)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn feed_shows_only_followed_authors() {
    let fx = fixture();
    let reader = fx.user("reader").await;
    let bystander = fx.user("bystander").await;
    let writer = fx.user("writer").await;
    let other = fx.user("other").await;
    fx.post(&writer, "followed words", None).await;
    fx.post(&other, "unrelated words", None).await;
    fx.repo.follow(reader.id, writer.id).await.unwrap();
    let app = app!(fx);

    let req = test::TestRequest::get().uri("/follow/").cookie(fx.session(&reader)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body = String::from_utf8_lossy(&test::read_body(resp).await).into_owned();
    assert!(body.contains("followed words"));
    assert!(!body.contains("unrelated words"));

    let req = test::TestRequest::get().uri("/follow/").cookie(fx.session(&bystander)).to_request();
    let body = String::from_utf8_lossy(&test::call_and_read_body(&app, req).await).into_owned();
    assert!(!body.contains("followed words"));

    let resp = test::call_service(&app, test::TestRequest::get().uri("/follow/").to_request()).await;
    assert_eq!(location(&resp), "/auth/login/?next=/follow/");
}
