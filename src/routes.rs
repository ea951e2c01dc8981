use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::http::header::{self, CacheControl, CacheDirective, ContentType};
use actix_web::{web, HttpRequest, HttpResponse};

use crate::auth::{self, Auth, JwtKeys, Role};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::forms::{self, CommentInput, FieldErrors, GroupInput, LoginInput, SignupInput};
use crate::models::*;
use crate::page_cache::PageCache;
use crate::pages::{self, PostFormMode, PostFormValues, ProfileView};
use crate::pagination::{Page, PageInfo, PageQuery, PAGE_SIZE};
use crate::repo::{RepoError, SharedRepo};
use crate::storage::ImageStore;

/// Registers every route. The page cache is shared across workers, so it is built once by the caller.
pub fn config(page_cache: PageCache) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(web::FormConfig::default().limit(forms::FORM_BODY_LIMIT))
            .service(web::resource("/").wrap(page_cache).route(web::get().to(index)))
            .service(
                web::resource("/new")
                    .route(web::get().to(new_post_form))
                    .route(web::post().to(new_post)),
            )
            .service(web::resource("/follow/").route(web::get().to(follow_index)))
            .service(web::resource("/group/{slug}/").route(web::get().to(group_posts)))
            .service(web::resource("/media/{hash}").route(web::get().to(get_media)))
            .service(
                web::scope("/auth")
                    .service(
                        web::resource("/signup/")
                            .route(web::get().to(signup_form))
                            .route(web::post().to(signup)),
                    )
                    .service(
                        web::resource("/login/")
                            .route(web::get().to(login_form))
                            .route(web::post().to(login)),
                    )
                    .service(web::resource("/logout/").route(web::post().to(logout))),
            )
            .service(
                web::scope("/admin")
                    .service(
                        web::resource("/groups/")
                            .route(web::get().to(admin_groups))
                            .route(web::post().to(admin_create_group)),
                    )
                    .service(web::resource("/groups/{slug}/delete/").route(web::post().to(admin_delete_group)))
                    .service(web::resource("/users/{username}/delete/").route(web::post().to(admin_delete_user))),
            )
            .service(web::resource("/{username}/").route(web::get().to(profile)))
            .service(
                web::resource("/{username}/follow/")
                    .route(web::get().to(profile_follow))
                    .route(web::post().to(profile_follow)),
            )
            .service(
                web::resource("/{username}/unfollow/")
                    .route(web::get().to(profile_unfollow))
                    .route(web::post().to(profile_unfollow)),
            )
            .service(web::resource("/{username}/{post_id:\\d+}/").route(web::get().to(post_view)))
            .service(
                web::resource("/{username}/{post_id:\\d+}/edit/")
                    .route(web::get().to(post_edit_form))
                    .route(web::post().to(post_edit)),
            )
            .service(
                web::resource("/{username}/{post_id:\\d+}/comment/")
                    .route(web::get().to(comment_form))
                    .route(web::post().to(add_comment)),
            )
            .default_service(web::to(page_not_found));
    }
}

#[derive(Clone)]
pub struct AppState {
    pub repo: SharedRepo,
    pub image_store: Arc<dyn ImageStore>,
    pub keys: JwtKeys,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(repo: SharedRepo, image_store: Arc<dyn ImageStore>, config: AppConfig) -> Self {
        let keys = JwtKeys::from_secret(config.jwt_secret.as_bytes());
        Self { repo, image_store, keys, config: Arc::new(config) }
    }
}

fn html(body: String) -> HttpResponse {
    HttpResponse::Ok().content_type(ContentType::html()).body(body)
}

fn redirect(to: &str) -> HttpResponse {
    HttpResponse::Found().insert_header((header::LOCATION, to)).finish()
}

fn profile_url(username: &str) -> String {
    format!("/{}/", urlencoding::encode(username))
}

fn post_url(username: &str, post_id: Id) -> String {
    format!("/{}/{}/", urlencoding::encode(username), post_id)
}

fn claims(viewer: &Option<Auth>) -> Option<&auth::Claims> {
    viewer.as_ref().map(|a| &a.0)
}

async fn load_page(data: &AppState, filter: PostFilter, raw_page: Option<&str>) -> Result<Page<PostCard>, AppError> {
    let total = data.repo.count_posts(filter).await?;
    let info = PageInfo::resolve(raw_page, total, PAGE_SIZE);
    let items = data.repo.list_posts(filter, info.limit(), info.offset()).await?;
    Ok(Page { items, info })
}

/// Resolves `/{username}/{post_id}/`: both must exist and the post must belong to the user.
async fn resolve_post(data: &AppState, username: &str, post_id: Id) -> Result<(User, Post), AppError> {
    let owner = data.repo.get_user_by_username(username).await?;
    let post = data.repo.get_post(post_id).await?;
    if post.author_id != Some(owner.id) {
        return Err(AppError::NotFound);
    }
    Ok((owner, post))
}

// ---------------- feeds -----------------------------------------------------

pub async fn index(data: web::Data<AppState>, query: web::Query<PageQuery>) -> Result<HttpResponse, AppError> {
    let page = load_page(&data, PostFilter::All, query.page.as_deref()).await?;
    Ok(html(pages::index(&page)))
}

pub async fn group_posts(
    viewer: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let group = data.repo.get_group_by_slug(&path.into_inner()).await?;
    let page = load_page(&data, PostFilter::Group(group.id), query.page.as_deref()).await?;
    Ok(html(pages::group(claims(&viewer), &group, &page)))
}

pub async fn follow_index(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let authors = data.repo.list_followed_authors(auth.user_id()).await?;
    let page = load_page(&data, PostFilter::FollowedBy(auth.user_id()), query.page.as_deref()).await?;
    Ok(html(pages::follow_feed(Some(&auth.0), &authors, &page)))
}

// ---------------- profile & follow ----------------------------------------

pub async fn profile(
    viewer: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let user = data.repo.get_user_by_username(&path.into_inner()).await?;
    let page = load_page(&data, PostFilter::Author(user.id), query.page.as_deref()).await?;
    let stats = data.repo.follow_stats(user.id).await?;
    let following = match &viewer {
        Some(v) if v.user_id() != user.id => data.repo.is_following(v.user_id(), user.id).await?,
        _ => false,
    };
    let view = ProfileView { user: &user, stats, following, page: &page };
    Ok(html(pages::profile(claims(&viewer), &view)))
}

pub async fn profile_follow(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, AppError> {
    let author = data.repo.get_user_by_username(&path.into_inner()).await?;
    let target = profile_url(&author.username);
    if author.id == auth.user_id() {
        return Ok(redirect(&target));
    }
    let created = data.repo.follow(auth.user_id(), author.id).await?;
    tracing::debug!(follower = auth.user_id(), author = author.id, created, "follow");
    Ok(redirect(&target))
}

pub async fn profile_unfollow(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, AppError> {
    let author = data.repo.get_user_by_username(&path.into_inner()).await?;
    let removed = data.repo.unfollow(auth.user_id(), author.id).await?;
    tracing::debug!(follower = auth.user_id(), author = author.id, removed, "unfollow");
    Ok(redirect(&profile_url(&author.username)))
}

// ---------------- posts ------------------------------------------------------

/// Persists an accepted upload and returns its reference.
async fn store_image(data: &AppState, image: Option<(ImageRef, Vec<u8>)>) -> Result<Option<ImageRef>, AppError> {
    let Some((img, bytes)) = image else { return Ok(None) };
    let fresh = data.image_store.save(&img.hash, &img.mime, &bytes).await?;
    tracing::debug!(hash = %img.hash, fresh, "stored post image");
    Ok(Some(img))
}

pub async fn new_post_form(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let groups = data.repo.list_groups().await?;
    let values = PostFormValues { text: "", group_id: None };
    Ok(html(pages::post_form(Some(&auth.0), &PostFormMode::New, &groups, &values, &FieldErrors::default())))
}

pub async fn new_post(
    auth: Auth,
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Payload,
) -> Result<HttpResponse, AppError> {
    let input = forms::read_post_form(Multipart::new(req.headers(), payload)).await?;
    let groups = data.repo.list_groups().await?;
    let (text, group_id) = (input.text.clone(), input.group.trim().parse().ok());
    let form = match forms::validate_post(input, &groups) {
        Ok(f) => f,
        Err(errors) => {
            let values = PostFormValues { text: &text, group_id };
            return Ok(html(pages::post_form(Some(&auth.0), &PostFormMode::New, &groups, &values, &errors)));
        }
    };
    let image = store_image(&data, form.image).await?;
    let post = data
        .repo
        .create_post(NewPost { text: form.text, author_id: auth.user_id(), group_id: form.group_id, image })
        .await?;
    tracing::info!(post_id = post.id, author = auth.user_id(), "post created");
    Ok(redirect("/"))
}

pub async fn post_view(
    viewer: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
) -> Result<HttpResponse, AppError> {
    let (username, post_id) = path.into_inner();
    resolve_post(&data, &username, post_id).await?;
    let card = data.repo.get_post_card(post_id).await?;
    let comments = data.repo.list_comments(post_id).await?;
    Ok(html(pages::post_detail(claims(&viewer), &card, &comments, "", &FieldErrors::default())))
}

/// Non-authors (anonymous included) are sent back to the post instead of getting an error.
fn editor(viewer: Option<Auth>, post: &Post) -> Option<Auth> {
    viewer.filter(|a| post.author_id == Some(a.user_id()))
}

pub async fn post_edit_form(
    viewer: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
) -> Result<HttpResponse, AppError> {
    let (username, post_id) = path.into_inner();
    let (owner, post) = resolve_post(&data, &username, post_id).await?;
    let Some(auth) = editor(viewer, &post) else {
        return Ok(redirect(&post_url(&owner.username, post_id)));
    };
    let groups = data.repo.list_groups().await?;
    let mode = PostFormMode::Edit { username: &owner.username, post_id, has_image: post.image_hash.is_some() };
    let values = PostFormValues { text: &post.text, group_id: post.group_id };
    Ok(html(pages::post_form(Some(&auth.0), &mode, &groups, &values, &FieldErrors::default())))
}

pub async fn post_edit(
    viewer: Option<Auth>,
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
    payload: web::Payload,
) -> Result<HttpResponse, AppError> {
    let (username, post_id) = path.into_inner();
    let (owner, post) = resolve_post(&data, &username, post_id).await?;
    let detail = post_url(&owner.username, post_id);
    let Some(auth) = editor(viewer, &post) else {
        tracing::debug!(post_id, "edit refused for non-author");
        return Ok(redirect(&detail));
    };
    let input = forms::read_post_form(Multipart::new(req.headers(), payload)).await?;
    let groups = data.repo.list_groups().await?;
    let (text, group_id) = (input.text.clone(), input.group.trim().parse().ok());
    let form = match forms::validate_post(input, &groups) {
        Ok(f) => f,
        Err(errors) => {
            let mode = PostFormMode::Edit { username: &owner.username, post_id, has_image: post.image_hash.is_some() };
            let values = PostFormValues { text: &text, group_id };
            return Ok(html(pages::post_form(Some(&auth.0), &mode, &groups, &values, &errors)));
        }
    };
    let image = match store_image(&data, form.image).await? {
        Some(img) => ImageChange::Replace(img),
        None if form.clear_image => ImageChange::Clear,
        None => ImageChange::Keep,
    };
    data.repo.update_post(post_id, UpdatePost { text: form.text, group_id: form.group_id, image }).await?;
    tracing::info!(post_id, "post edited");
    Ok(redirect(&detail))
}

// ---------------- comments ---------------------------------------------------

pub async fn comment_form(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
) -> Result<HttpResponse, AppError> {
    let (username, post_id) = path.into_inner();
    resolve_post(&data, &username, post_id).await?;
    let card = data.repo.get_post_card(post_id).await?;
    let comments = data.repo.list_comments(post_id).await?;
    Ok(html(pages::post_detail(Some(&auth.0), &card, &comments, "", &FieldErrors::default())))
}

pub async fn add_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
    form: web::Form<CommentInput>,
) -> Result<HttpResponse, AppError> {
    let (username, post_id) = path.into_inner();
    let (owner, _) = resolve_post(&data, &username, post_id).await?;
    let text = match forms::validate_comment(&form) {
        Ok(t) => t,
        Err(errors) => {
            let card = data.repo.get_post_card(post_id).await?;
            let comments = data.repo.list_comments(post_id).await?;
            return Ok(html(pages::post_detail(Some(&auth.0), &card, &comments, &form.text, &errors)));
        }
    };
    data.repo.create_comment(NewComment { post_id, author_id: auth.user_id(), text }).await?;
    Ok(redirect(&post_url(&owner.username, post_id)))
}

// ---------------- media ------------------------------------------------------

pub async fn get_media(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, AppError> {
    let (bytes, mime) = data.image_store.load(&path.into_inner()).await?;
    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, mime))
        // content addressed: a hash never changes meaning
        .insert_header(CacheControl(vec![CacheDirective::Public, CacheDirective::MaxAge(31_536_000)]))
        .body(bytes))
}

// ---------------- accounts ---------------------------------------------------

#[derive(serde::Deserialize)]
pub struct NextQuery {
    #[serde(default)]
    next: String,
}

async fn start_session(data: &AppState, user: &User, next: &str) -> Result<HttpResponse, AppError> {
    let token = auth::create_jwt(&data.keys, user.id, &user.username, auth::roles_for(user)).map_err(|e| {
        tracing::error!("failed to sign session token: {e}");
        AppError::Internal
    })?;
    Ok(HttpResponse::Found()
        .cookie(auth::session_cookie(token, data.config.secure_cookies))
        .insert_header((header::LOCATION, forms::safe_next(next)))
        .finish())
}

pub async fn signup_form() -> HttpResponse {
    html(pages::signup("", &FieldErrors::default()))
}

pub async fn signup(data: web::Data<AppState>, form: web::Form<SignupInput>) -> Result<HttpResponse, AppError> {
    let valid = match forms::validate_signup(&form) {
        Ok(v) => v,
        Err(errors) => return Ok(html(pages::signup(&form.username, &errors))),
    };
    let password = valid.password;
    let password_hash = web::block(move || auth::hash_password(&password))
        .await
        .map_err(|_| AppError::Internal)?
        .map_err(|e| {
            tracing::error!("{e}");
            AppError::Internal
        })?;
    let is_admin = data.config.is_bootstrap_admin(&valid.username);
    let user = match data.repo.create_user(NewUser { username: valid.username, password_hash, is_admin }).await {
        Ok(u) => u,
        Err(RepoError::Conflict) => {
            let mut errors = FieldErrors::default();
            errors.add("username", "A user with that username already exists.");
            return Ok(html(pages::signup(&form.username, &errors)));
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(user_id = user.id, is_admin, "user signed up");
    start_session(&data, &user, "/").await
}

pub async fn login_form(query: web::Query<NextQuery>) -> HttpResponse {
    html(pages::login(&query.next, "", None))
}

pub async fn login(data: web::Data<AppState>, form: web::Form<LoginInput>) -> Result<HttpResponse, AppError> {
    const BAD_CREDENTIALS: &str = "Please enter a correct username and password.";
    let user = match data.repo.get_user_by_username(form.username.trim()).await {
        Ok(u) => Some(u),
        Err(RepoError::NotFound) => None,
        Err(e) => return Err(e.into()),
    };
    let verified = match &user {
        Some(u) => {
            let (password, hash) = (form.password.clone(), u.password_hash.clone());
            web::block(move || auth::verify_password(&password, &hash))
                .await
                .map_err(|_| AppError::Internal)?
                .map_err(|e| {
                    tracing::error!("{e}");
                    AppError::Internal
                })?
        }
        None => false,
    };
    match user {
        Some(u) if verified => start_session(&data, &u, &form.next).await,
        _ => {
            tracing::debug!(username = %form.username, "login failed");
            Ok(html(pages::login(&form.next, &form.username, Some(BAD_CREDENTIALS))))
        }
    }
}

pub async fn logout() -> HttpResponse {
    HttpResponse::Found()
        .cookie(auth::clear_session_cookie())
        .insert_header((header::LOCATION, "/"))
        .finish()
}

// ---------------- admin ------------------------------------------------------

pub async fn admin_groups(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    crate::require_role!(auth, Role::Admin);
    let groups = data.repo.list_groups().await?;
    Ok(html(pages::admin_groups(Some(&auth.0), &groups, &GroupInput::default(), &FieldErrors::default())))
}

pub async fn admin_create_group(
    auth: Auth,
    data: web::Data<AppState>,
    form: web::Form<GroupInput>,
) -> Result<HttpResponse, AppError> {
    crate::require_role!(auth, Role::Admin);
    let new = match forms::validate_group(&form) {
        Ok(g) => g,
        Err(errors) => {
            let groups = data.repo.list_groups().await?;
            return Ok(html(pages::admin_groups(Some(&auth.0), &groups, &form, &errors)));
        }
    };
    match data.repo.create_group(new).await {
        Ok(g) => {
            tracing::info!(group_id = g.id, slug = %g.slug, "group created");
            Ok(redirect("/admin/groups/"))
        }
        Err(RepoError::Conflict) => {
            let mut errors = FieldErrors::default();
            errors.add("slug", "Group with this slug already exists.");
            let groups = data.repo.list_groups().await?;
            Ok(HttpResponse::BadRequest()
                .content_type(ContentType::html())
                .body(pages::admin_groups(Some(&auth.0), &groups, &form, &errors)))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn admin_delete_group(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, AppError> {
    crate::require_role!(auth, Role::Admin);
    let group = data.repo.get_group_by_slug(&path.into_inner()).await?;
    data.repo.delete_group(group.id).await?;
    tracing::info!(group_id = group.id, "group deleted with its posts");
    Ok(redirect("/admin/groups/"))
}

pub async fn admin_delete_user(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, AppError> {
    crate::require_role!(auth, Role::Admin);
    let user = data.repo.get_user_by_username(&path.into_inner()).await?;
    data.repo.delete_user(user.id).await?;
    tracing::info!(user_id = user.id, "user deleted with posts, comments and follows");
    Ok(redirect("/"))
}

// ---------------- fallbacks --------------------------------------------------

pub async fn page_not_found(req: HttpRequest) -> HttpResponse {
    HttpResponse::NotFound()
        .content_type(ContentType::html())
        .body(pages::not_found(Some(req.path())))
}
