#![cfg(feature = "inmem-store")]

#[macro_use]
mod common;

use actix_web::test;
use blogfeed::repo::CommentRepo;
use blogfeed::forms::TEXT_MAX_LEN;
use common::{fixture, location};

#[actix_web::test]
async fn anonymous_comment_redirects_to_login() {
    let fx = fixture();
    let leo = fx.user("leo").await;
    let post = fx.post(&leo, "discuss", None).await;
    let app = app!(fx);

    let uri = format!("/leo/{}/comment/", post.id);
    let req = test::TestRequest::post().uri(&uri).set_form([("text", "drive-by")]).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(location(&resp), format!("/auth/login/?next={uri}"));
    assert!(fx.repo.list_comments(post.id).await.unwrap().is_empty());
}

#[actix_web::test]
async fn comment_appears_on_post() {
    let fx = fixture();
    let leo = fx.user("leo").await;
    let anna = fx.user("anna").await;
    let post = fx.post(&leo, "discuss", None).await;
    let app = app!(fx);

    let req = test::TestRequest::post()
        .uri(&format!("/leo/{}/comment/", post.id))
        .cookie(fx.session(&anna))
        .set_form([("text", "Thoughtful reply")])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(location(&resp), format!("/leo/{}/", post.id));

    let body = test::call_and_read_body(&app, test::TestRequest::get().uri(&format!("/leo/{}/", post.id)).to_request()).await;
    let body = String::from_utf8_lossy(&body);
    assert!(body.contains("Thoughtful reply"));
    assert!(body.contains("@anna"));
    assert!(body.contains("Comments: 1"));
}

#[actix_web::test]
async fn empty_comment_is_rejected() {
    let fx = fixture();
    let leo = fx.user("leo").await;
    let post = fx.post(&leo, "discuss", None).await;
    let app = app!(fx);

    let req = test::TestRequest::post()
        .uri(&format!("/leo/{}/comment/", post.id))
        .cookie(fx.session(&leo))
        .set_form([("text", "   ")])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert!(String::from_utf8_lossy(&test::read_body(resp).await).contains("This field is required."));
    assert!(fx.repo.list_comments(post.id).await.unwrap().is_empty());
}

#[actix_web::test]
async fn comment_on_mismatched_author_is_404() {
    let fx = fixture();
    let leo = fx.user("leo").await;
    let anna = fx.user("anna").await;
    let post = fx.post(&leo, "discuss", None).await;
    let app = app!(fx);

    let req = test::TestRequest::post()
        .uri(&format!("/anna/{}/comment/", post.id))
        .cookie(fx.session(&anna))
        .set_form([("text", "lost")])
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    let req = test::TestRequest::get().uri(&format!("/leo/{}/comment/", post.id)).cookie(fx.session(&anna)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn long_comment_is_saved_and_overlong_one_rerendered() {
    let fx = fixture();
    let leo = fx.user("leo").await;
    let post = fx.post(&leo, "discuss", None).await;
    let app = app!(fx);
    let uri = format!("/leo/{}/comment/", post.id);

    let long = "b".repeat(20_000);
    let req = test::TestRequest::post().uri(&uri).cookie(fx.session(&leo)).set_form([("text", long.as_str())]).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 302);
    assert_eq!(fx.repo.list_comments(post.id).await.unwrap()[0].text, long);

    let overlong = "c".repeat(TEXT_MAX_LEN + 1);
    let req =
        test::TestRequest::post().uri(&uri).cookie(fx.session(&leo)).set_form([("text", overlong.as_str())]).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let page = String::from_utf8_lossy(&test::read_body(resp).await).into_owned();
    assert!(page.contains(&format!("Ensure this value has at most {TEXT_MAX_LEN} characters.")));
    assert_eq!(fx.repo.list_comments(post.id).await.unwrap().len(), 1);
}
