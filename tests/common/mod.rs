#![allow(dead_code)]

use actix_web::cookie::Cookie;
use blogfeed::auth::{create_jwt, roles_for};
use blogfeed::models::{Group, NewGroup, NewPost, NewUser, Post, User};
use blogfeed::repo::inmem::InMemRepo;
use blogfeed::repo::{GroupRepo, PostRepo, UserRepo};
use blogfeed::storage::FsImageStore;
use blogfeed::{AppConfig, AppState};
use std::sync::Arc;

pub const SECRET: &str = "test-secret-must-be-32-bytes-long!!";
const BOUNDARY: &str = "----blogfeed-test-boundary";

/// Builds a test service around `$fx.state`; the page cache TTL defaults to 20s.
macro_rules! app {
    ($fx:expr) => {
        app!($fx, std::time::Duration::from_secs(20))
    };
    ($fx:expr, $ttl:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .wrap(blogfeed::SecurityHeaders::default())
                .app_data(actix_web::web::Data::new($fx.state.clone()))
                .configure(blogfeed::config(blogfeed::PageCache::new($ttl))),
        )
        .await
    };
}

pub struct Fixture {
    pub repo: InMemRepo,
    pub state: AppState,
    pub media: tempfile::TempDir,
}

pub fn fixture() -> Fixture {
    fixture_with(&[])
}

pub fn fixture_with(extra: &[(&str, &str)]) -> Fixture {
    let media = tempfile::tempdir().unwrap();
    let vars: Vec<(String, String)> = extra.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    let config = AppConfig::from_lookup(|name| match name {
        "JWT_SECRET" => Some(SECRET.to_string()),
        _ => vars.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone()),
    })
    .unwrap();
    let repo = InMemRepo::new();
    let store = FsImageStore::new(media.path());
    let state = AppState::new(Arc::new(repo.clone()), Arc::new(store), config);
    Fixture { repo, state, media }
}

pub fn unique(prefix: &str) -> String {
    format!("{prefix}{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

impl Fixture {
    pub async fn user(&self, username: &str) -> User {
        self.repo
            .create_user(NewUser { username: username.into(), password_hash: "unused".into(), is_admin: false })
            .await
            .unwrap()
    }

    pub async fn admin(&self, username: &str) -> User {
        self.repo
            .create_user(NewUser { username: username.into(), password_hash: "unused".into(), is_admin: true })
            .await
            .unwrap()
    }

    pub async fn group(&self, slug: &str) -> Group {
        self.repo
            .create_group(NewGroup { title: format!("Title {slug}"), slug: slug.into(), description: "about".into() })
            .await
            .unwrap()
    }

    pub async fn post(&self, author: &User, text: &str, group: Option<&Group>) -> Post {
        self.repo
            .create_post(NewPost { text: text.into(), author_id: author.id, group_id: group.map(|g| g.id), image: None })
            .await
            .unwrap()
    }

    /// Session cookie as issued at login.
    pub fn session(&self, user: &User) -> Cookie<'static> {
        let token = create_jwt(&self.state.keys, user.id, &user.username, roles_for(user)).unwrap();
        Cookie::new("session", token)
    }
}

/// Encodes a `multipart/form-data` body; `file` becomes the `image` part.
pub fn multipart(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
        );
    }
    if let Some((filename, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}

/// 1x1 transparent PNG.
pub fn small_png() -> Vec<u8> {
    vec![
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R', 0x00, 0x00,
        0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00,
        0x0A, b'I', b'D', b'A', b'T', 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D,
        0xB4, 0x00, 0x00, 0x00, 0x00, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82,
    ]
}

pub fn location<B>(resp: &actix_web::dev::ServiceResponse<B>) -> String {
    resp.headers().get("location").map(|v| v.to_str().unwrap().to_string()).unwrap_or_default()
}
