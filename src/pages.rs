//! Server-rendered HTML.
//!
//! Every piece of user-controlled text goes through [`esc`] before it is
//! spliced into markup.

use crate::auth::Claims;
use crate::error::login_redirect_target;
use crate::forms::FieldErrors;
use crate::models::{CommentView, FollowStats, Group, Id, PostCard, User};
use crate::pagination::Page;

pub fn esc(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escaped text with line breaks kept.
fn linebreaks(s: &str) -> String {
    esc(s).replace("\r\n", "\n").replace('\n', "<br>")
}

fn errors_for(errors: &FieldErrors, field: &str) -> String {
    errors
        .get(field)
        .iter()
        .map(|m| format!(r#"<div class="invalid-feedback d-block">{}</div>"#, esc(m)))
        .collect()
}

fn nav(viewer: Option<&Claims>) -> String {
    let right = match viewer {
        Some(c) => {
            let admin = if c.is_admin() { r#"<li class="nav-item"><a class="nav-link" href="/admin/groups/">Admin</a></li>"# } else { "" };
            format!(
                r#"<li class="nav-item"><a class="nav-link" href="/new">New post</a></li>
<li class="nav-item"><a class="nav-link" href="/follow/">Following</a></li>
<li class="nav-item"><a class="nav-link" href="/{u}/">@{u}</a></li>{admin}
<li class="nav-item"><form action="/auth/logout/" method="post"><button class="btn btn-link nav-link" type="submit">Log out</button></form></li>"#,
                u = esc(&c.sub),
            )
        }
        None => r#"<li class="nav-item"><a class="nav-link" href="/auth/login/">Log in</a></li>
<li class="nav-item"><a class="nav-link" href="/auth/signup/">Sign up</a></li>"#
            .to_string(),
    };
    format!(
        r#"<nav class="navbar navbar-light bg-light"><a class="navbar-brand" href="/">Blogfeed</a><ul class="nav">{right}</ul></nav>"#
    )
}

pub fn layout(title: &str, viewer: Option<&Claims>, body: &str) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
</head>
<body>
{nav}
<main class="container py-4">
{body}
</main>
</body>
</html>"#,
        title = esc(title),
        nav = nav(viewer),
    )
}

fn is_author(viewer: Option<&Claims>, author_id: Option<Id>) -> bool {
    matches!((viewer, author_id), (Some(c), Some(a)) if c.uid == a)
}

pub fn post_card(card: &PostCard, viewer: Option<&Claims>) -> String {
    let author = card.author_username.as_deref().unwrap_or("deleted");
    let image = match &card.image_hash {
        Some(hash) => format!(r#"<img class="card-img" src="/media/{}" alt="">"#, esc(hash)),
        None => String::new(),
    };
    let group = match (&card.group_slug, &card.group_title) {
        (Some(slug), Some(title)) => {
            format!(r#"<a class="card-link" href="/group/{}/">#{}</a>"#, esc(slug), esc(title))
        }
        _ => String::new(),
    };
    let edit = if is_author(viewer, card.author_id) {
        format!(r#"<a class="btn btn-sm btn-outline-secondary" href="/{}/{}/edit/">Edit</a>"#, esc(author), card.id)
    } else {
        String::new()
    };
    format!(
        r#"<div class="card mb-3 mt-1 shadow-sm">
{image}
<div class="card-body">
<p class="card-text"><a href="/{a}/"><strong class="d-block text-gray-dark">@{a}</strong></a>{text}</p>
{group}
<div class="d-flex justify-content-between align-items-center">
<div class="btn-group"><a class="btn btn-sm btn-outline-primary" href="/{a}/{id}/">Comments: {comments}</a>{edit}</div>
<small class="text-muted">{date}</small>
</div>
</div>
</div>"#,
        a = esc(author),
        text = linebreaks(&card.text),
        id = card.id,
        comments = card.comment_count,
        date = card.pub_date.format("%d.%m.%Y %H:%M"),
    )
}

fn paginator(page: &Page<PostCard>) -> String {
    let info = &page.info;
    if info.num_pages <= 1 {
        return String::new();
    }
    let mut out = String::from(r#"<nav><ul class="pagination">"#);
    if info.has_previous() {
        out.push_str(&format!(
            r#"<li class="page-item"><a class="page-link" href="?page=1">First</a></li><li class="page-item"><a class="page-link" href="?page={}">Previous</a></li>"#,
            info.number - 1
        ));
    }
    out.push_str(&format!(
        r#"<li class="page-item active"><span class="page-link">Page {} of {}</span></li>"#,
        info.number, info.num_pages
    ));
    if info.has_next() {
        out.push_str(&format!(
            r#"<li class="page-item"><a class="page-link" href="?page={}">Next</a></li><li class="page-item"><a class="page-link" href="?page={}">Last</a></li>"#,
            info.number + 1,
            info.num_pages
        ));
    }
    out.push_str("</ul></nav>");
    out
}

fn post_list(page: &Page<PostCard>, viewer: Option<&Claims>) -> String {
    if page.items.is_empty() {
        return r#"<p class="text-muted">No posts yet.</p>"#.to_string();
    }
    let cards: String = page.items.iter().map(|c| post_card(c, viewer)).collect();
    format!("{cards}{}", paginator(page))
}

/// Home feed. Rendered without viewer-specific markup: the response is shared through the page cache.
pub fn index(page: &Page<PostCard>) -> String {
    let body = format!("<h1>Latest posts</h1>\n{}", post_list(page, None));
    layout("Latest posts", None, &body)
}

pub fn group(viewer: Option<&Claims>, group: &Group, page: &Page<PostCard>) -> String {
    let body = format!(
        "<h1>{}</h1>\n<p>{}</p>\n{}",
        esc(&group.title),
        linebreaks(&group.description),
        post_list(page, viewer)
    );
    layout(&group.title, viewer, &body)
}

pub struct ProfileView<'a> {
    pub user: &'a User,
    pub stats: FollowStats,
    pub following: bool,
    pub page: &'a Page<PostCard>,
}

pub fn profile(viewer: Option<&Claims>, view: &ProfileView<'_>) -> String {
    let u = esc(&view.user.username);
    let button = match viewer {
        Some(c) if c.uid != view.user.id => {
            if view.following {
                format!(r#"<form action="/{u}/unfollow/" method="post"><button class="btn btn-light" type="submit">Unfollow</button></form>"#)
            } else {
                format!(r#"<form action="/{u}/follow/" method="post"><button class="btn btn-primary" type="submit">Follow</button></form>"#)
            }
        }
        _ => String::new(),
    };
    let body = format!(
        r#"<div class="card mb-3">
<div class="card-body">
<div class="h2">@{u}</div>
<ul class="list-group list-group-flush">
<li class="list-group-item">Followers: {followers}</li>
<li class="list-group-item">Following: {following}</li>
<li class="list-group-item">Posts: {posts}</li>
</ul>
{button}
</div>
</div>
{list}"#,
        followers = view.stats.followers,
        following = view.stats.following,
        posts = view.page.info.total,
        list = post_list(view.page, viewer),
    );
    layout(&format!("@{}", view.user.username), viewer, &body)
}

pub fn post_detail(
    viewer: Option<&Claims>,
    card: &PostCard,
    comments: &[CommentView],
    comment_text: &str,
    errors: &FieldErrors,
) -> String {
    let author = card.author_username.as_deref().unwrap_or("deleted");
    let list: String = comments
        .iter()
        .map(|c| {
            let who = esc(c.author_username.as_deref().unwrap_or("deleted"));
            format!(
                r#"<div class="media mb-3"><div class="media-body"><h6 class="mt-0"><a href="/{who}/">@{who}</a></h6><p>{}</p></div></div>"#,
                linebreaks(&c.text)
            )
        })
        .collect();
    let form = if viewer.is_some() {
        format!(
            r#"<form action="/{a}/{id}/comment/" method="post">
<div class="form-group"><label for="id_text">Add a comment</label>
<textarea name="text" id="id_text" class="form-control" required>{value}</textarea>{errs}</div>
<button type="submit" class="btn btn-primary">Send</button>
</form>"#,
            a = esc(author),
            id = card.id,
            value = esc(comment_text),
            errs = errors_for(errors, "text"),
        )
    } else {
        let login = login_redirect_target(&format!("/{author}/{}/", card.id));
        format!(r#"<p><a href="{}">Log in</a> to comment.</p>"#, esc(&login))
    };
    let body = format!("{}\n<h5>Comments</h5>\n{list}\n{form}", post_card(card, viewer));
    layout("Post", viewer, &body)
}

pub enum PostFormMode<'a> {
    New,
    Edit { username: &'a str, post_id: Id, has_image: bool },
}

pub struct PostFormValues<'a> {
    pub text: &'a str,
    pub group_id: Option<Id>,
}

pub fn post_form(
    viewer: Option<&Claims>,
    mode: &PostFormMode<'_>,
    groups: &[Group],
    values: &PostFormValues<'_>,
    errors: &FieldErrors,
) -> String {
    let (heading, action, submit) = match mode {
        PostFormMode::New => ("New post".to_string(), "/new".to_string(), "Publish"),
        PostFormMode::Edit { username, post_id, .. } => {
            ("Edit post".to_string(), format!("/{}/{}/edit/", esc(username), post_id), "Save")
        }
    };
    let options: String = groups
        .iter()
        .map(|g| {
            let selected = if values.group_id == Some(g.id) { " selected" } else { "" };
            format!(r#"<option value="{}"{selected}>{}</option>"#, g.id, esc(&g.title))
        })
        .collect();
    let clear = match mode {
        PostFormMode::Edit { has_image: true, .. } => {
            r#"<div class="form-check"><input type="checkbox" name="image-clear" id="image-clear_id" class="form-check-input"><label for="image-clear_id" class="form-check-label">Remove current image</label></div>"#
        }
        _ => "",
    };
    let body = format!(
        r#"<h1>{heading}</h1>
<form action="{action}" method="post" enctype="multipart/form-data">
<div class="form-group"><label for="id_text">Text</label>
<textarea name="text" id="id_text" class="form-control" required>{text}</textarea>{text_errs}</div>
<div class="form-group"><label for="id_group">Group</label>
<select name="group" id="id_group" class="form-control"><option value="">---------</option>{options}</select>{group_errs}</div>
<div class="form-group"><label for="id_image">Image</label>
<input type="file" name="image" accept="image/*" id="id_image" class="form-control-file">{clear}{image_errs}</div>
<button type="submit" class="btn btn-primary">{submit}</button>
</form>"#,
        text = esc(values.text),
        text_errs = errors_for(errors, "text"),
        group_errs = errors_for(errors, "group"),
        image_errs = errors_for(errors, "image"),
    );
    layout(&heading, viewer, &body)
}

pub fn follow_feed(viewer: Option<&Claims>, authors: &[String], page: &Page<PostCard>) -> String {
    let following = if authors.is_empty() {
        r#"<p class="text-muted">You are not following anyone yet.</p>"#.to_string()
    } else {
        let links: Vec<String> = authors.iter().map(|a| format!(r#"<a href="/{0}/">@{0}</a>"#, esc(a))).collect();
        format!("<p>Following: {}</p>", links.join(", "))
    };
    let body = format!("<h1>Your subscriptions</h1>\n{following}\n{}", post_list(page, viewer));
    layout("Subscriptions", viewer, &body)
}

pub fn login(next: &str, username: &str, error: Option<&str>) -> String {
    let err = error.map(|e| format!(r#"<div class="alert alert-danger">{}</div>"#, esc(e))).unwrap_or_default();
    let body = format!(
        r#"<h1>Log in</h1>
{err}
<form action="/auth/login/" method="post">
<input type="hidden" name="next" value="{next}">
<div class="form-group"><label for="id_username">Username</label><input type="text" name="username" id="id_username" class="form-control" value="{username}" required></div>
<div class="form-group"><label for="id_password">Password</label><input type="password" name="password" id="id_password" class="form-control" required></div>
<button type="submit" class="btn btn-primary">Log in</button>
</form>
<p>No account? <a href="/auth/signup/">Sign up</a></p>"#,
        next = esc(next),
        username = esc(username),
    );
    layout("Log in", None, &body)
}

pub fn signup(username: &str, errors: &FieldErrors) -> String {
    let body = format!(
        r#"<h1>Sign up</h1>
<form action="/auth/signup/" method="post">
<div class="form-group"><label for="id_username">Username</label><input type="text" name="username" id="id_username" class="form-control" value="{username}" required>{u_errs}</div>
<div class="form-group"><label for="id_password1">Password</label><input type="password" name="password1" id="id_password1" class="form-control" required>{p1_errs}</div>
<div class="form-group"><label for="id_password2">Password confirmation</label><input type="password" name="password2" id="id_password2" class="form-control" required>{p2_errs}</div>
<button type="submit" class="btn btn-primary">Sign up</button>
</form>"#,
        username = esc(username),
        u_errs = errors_for(errors, "username"),
        p1_errs = errors_for(errors, "password1"),
        p2_errs = errors_for(errors, "password2"),
    );
    layout("Sign up", None, &body)
}

pub fn admin_groups(viewer: Option<&Claims>, groups: &[Group], values: &crate::forms::GroupInput, errors: &FieldErrors) -> String {
    let rows: String = groups
        .iter()
        .map(|g| {
            format!(
                r#"<li class="list-group-item d-flex justify-content-between"><a href="/group/{slug}/">{title}</a><form action="/admin/groups/{slug}/delete/" method="post"><button class="btn btn-sm btn-danger" type="submit">Delete</button></form></li>"#,
                slug = esc(&g.slug),
                title = esc(&g.title),
            )
        })
        .collect();
    let body = format!(
        r#"<h1>Groups</h1>
<ul class="list-group mb-4">{rows}</ul>
<h2>New group</h2>
<form action="/admin/groups/" method="post">
<div class="form-group"><label for="id_title">Title</label><input type="text" name="title" id="id_title" class="form-control" maxlength="200" value="{title}">{t_errs}</div>
<div class="form-group"><label for="id_slug">Slug</label><input type="text" name="slug" id="id_slug" class="form-control" value="{slug}">{s_errs}</div>
<div class="form-group"><label for="id_description">Description</label><textarea name="description" id="id_description" class="form-control">{description}</textarea>{d_errs}</div>
<button type="submit" class="btn btn-primary">Create</button>
</form>"#,
        title = esc(&values.title),
        slug = esc(&values.slug),
        description = esc(&values.description),
        t_errs = errors_for(errors, "title"),
        s_errs = errors_for(errors, "slug"),
        d_errs = errors_for(errors, "description"),
    );
    layout("Groups", viewer, &body)
}

pub fn not_found(path: Option<&str>) -> String {
    let detail = match path {
        Some(p) => format!("<p>Page <code>{}</code> does not exist.</p>", esc(p)),
        None => "<p>The requested page does not exist.</p>".to_string(),
    };
    layout("Page not found", None, &format!("<h1>Error 404</h1>\n{detail}\n<a href=\"/\">Back to the feed</a>"))
}

pub fn server_error() -> String {
    layout("Server error", None, "<h1>Error 500</h1>\n<p>Something went wrong on our side.</p>")
}

pub fn forbidden() -> String {
    layout("Forbidden", None, "<h1>Error 403</h1>\n<p>You do not have access to this page.</p>")
}

pub fn bad_request() -> String {
    layout("Bad request", None, "<h1>Error 400</h1>\n<p>The request could not be processed.</p>")
}
