//! Input validation for the HTML forms.
//!
//! Validators never fail the request: they return the cleaned value or a
//! set of per-field messages, and the handler re-renders the form with them.

use actix_multipart::Multipart;
use futures_util::TryStreamExt as _;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::AppError;
use crate::models::{Group, Id, ImageRef};
use crate::storage::{inspect_upload, IMAGE_SIZE_LIMIT};

pub const REQUIRED: &str = "This field is required.";
const INVALID_CHOICE: &str = "Select a valid choice. That choice is not one of the available choices.";
/// Longest post or comment body, in characters.
pub const TEXT_MAX_LEN: usize = 256 * 1024;
// a char is at most four bytes of UTF-8
const TEXT_FIELD_LIMIT: usize = 4 * TEXT_MAX_LEN;
/// Body limit for urlencoded forms: a full-length comment with every byte percent-encoded.
pub const FORM_BODY_LIMIT: usize = 3 * TEXT_FIELD_LIMIT + 4096;
const RESERVED_USERNAMES: &[&str] = &["new", "follow", "group", "auth", "media", "admin"];
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<&'static str, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &'static str, msg: impl Into<String>) {
        self.0.entry(field).or_default().push(msg.into());
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn into_result<T>(self, value: T) -> Result<T, FieldErrors> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

fn required_text(errors: &mut FieldErrors, field: &'static str, raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        errors.add(field, REQUIRED);
    }
    trimmed.to_string()
}

fn too_long_message() -> String {
    format!("Ensure this value has at most {TEXT_MAX_LEN} characters.")
}

fn body_text(errors: &mut FieldErrors, field: &'static str, raw: &str) -> String {
    let text = required_text(errors, field, raw);
    if text.chars().count() > TEXT_MAX_LEN {
        errors.add(field, too_long_message());
    }
    text
}

// ---------------- post form -----------------------------------------------

/// Raw fields of the multipart post form.
#[derive(Debug, Default, Clone)]
pub struct PostFormInput {
    pub text: String,
    pub group: String,
    pub image: Option<Vec<u8>>,
    pub image_too_large: bool,
    pub text_too_long: bool,
    pub clear_image: bool,
}

/// Cleaned post form. `image` carries the bytes to store alongside their reference.
#[derive(Debug, Clone)]
pub struct PostFormData {
    pub text: String,
    pub group_id: Option<Id>,
    pub image: Option<(ImageRef, Vec<u8>)>,
    pub clear_image: bool,
}

pub async fn read_post_form(mut payload: Multipart) -> Result<PostFormInput, AppError> {
    let mut input = PostFormInput::default();
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        tracing::debug!("multipart error: {e}");
        AppError::BadRequest
    })? {
        let name = field.content_disposition().get_name().unwrap_or_default().to_string();
        let limit = if name == "image" { IMAGE_SIZE_LIMIT } else { TEXT_FIELD_LIMIT };
        let mut bytes: Vec<u8> = Vec::new();
        let mut oversized = false;
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            tracing::debug!("multipart stream error: {e}");
            AppError::BadRequest
        })? {
            // once over the limit the field is dropped whole; later chunks are only drained
            if oversized || bytes.len() + chunk.len() > limit {
                oversized = true;
                bytes = Vec::new();
                continue;
            }
            bytes.extend_from_slice(&chunk);
        }
        match name.as_str() {
            "text" if oversized => input.text_too_long = true,
            "text" => input.text = String::from_utf8_lossy(&bytes).into_owned(),
            // no group id is that long
            "group" if oversized => input.group = "-".into(),
            "group" => input.group = String::from_utf8_lossy(&bytes).into_owned(),
            "image-clear" => input.clear_image = !bytes.is_empty(),
            "image" if oversized => input.image_too_large = true,
            // browsers send an empty part when no file was picked
            "image" if !bytes.is_empty() => input.image = Some(bytes),
            _ => {}
        }
    }
    Ok(input)
}

pub fn validate_post(input: PostFormInput, groups: &[Group]) -> Result<PostFormData, FieldErrors> {
    let mut errors = FieldErrors::default();
    let text = if input.text_too_long {
        errors.add("text", too_long_message());
        String::new()
    } else {
        body_text(&mut errors, "text", &input.text)
    };

    let group_raw = input.group.trim();
    let group_id = if group_raw.is_empty() {
        None
    } else {
        match group_raw.parse::<Id>().ok().filter(|id| groups.iter().any(|g| g.id == *id)) {
            Some(id) => Some(id),
            None => {
                errors.add("group", INVALID_CHOICE);
                None
            }
        }
    };

    let image = if input.image_too_large {
        errors.add("image", crate::storage::UploadError::TooLarge.to_string());
        None
    } else {
        match input.image {
            Some(bytes) => match inspect_upload(&bytes) {
                Ok(img) => Some((img, bytes)),
                Err(e) => {
                    errors.add("image", e.to_string());
                    None
                }
            },
            None => None,
        }
    };

    errors.into_result(PostFormData { text, group_id, image, clear_image: input.clear_image })
}

// ---------------- comment form --------------------------------------------

#[derive(Debug, Default, Clone, Deserialize)]
pub struct CommentInput {
    #[serde(default)]
    pub text: String,
}

pub fn validate_comment(input: &CommentInput) -> Result<String, FieldErrors> {
    let mut errors = FieldErrors::default();
    let text = body_text(&mut errors, "text", &input.text);
    errors.into_result(text)
}

// ---------------- account forms -------------------------------------------

#[derive(Debug, Default, Clone, Deserialize)]
pub struct SignupInput {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password1: String,
    #[serde(default)]
    pub password2: String,
}

#[derive(Debug)]
pub struct SignupData {
    pub username: String,
    pub password: String,
}

pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.chars().count() <= 150
        && name.chars().all(|c| c.is_alphanumeric() || "@.+-_".contains(c))
}

pub fn validate_signup(input: &SignupInput) -> Result<SignupData, FieldErrors> {
    let mut errors = FieldErrors::default();
    let username = required_text(&mut errors, "username", &input.username);
    if !username.is_empty() && !is_valid_username(&username) {
        errors.add(
            "username",
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
        );
    }
    if RESERVED_USERNAMES.contains(&username.to_lowercase().as_str()) {
        errors.add("username", "This username is reserved.");
    }
    if input.password1.is_empty() {
        errors.add("password1", REQUIRED);
    } else if input.password1.chars().count() < MIN_PASSWORD_LEN {
        errors.add("password1", "This password is too short. It must contain at least 8 characters.");
    }
    if input.password2 != input.password1 {
        errors.add("password2", "The two password fields didn't match.");
    }
    errors.into_result(SignupData { username, password: input.password1.clone() })
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct LoginInput {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub next: String,
}

/// Only same-site absolute paths are honoured as post-login targets.
pub fn safe_next(next: &str) -> &str {
    if next.starts_with('/') && !next.starts_with("//") && !next.contains('\\') {
        next
    } else {
        "/"
    }
}

// ---------------- group form (admin) --------------------------------------

#[derive(Debug, Default, Clone, Deserialize)]
pub struct GroupInput {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: String,
}

pub fn validate_group(input: &GroupInput) -> Result<crate::models::NewGroup, FieldErrors> {
    let mut errors = FieldErrors::default();
    let title = required_text(&mut errors, "title", &input.title);
    if title.chars().count() > 200 {
        errors.add("title", "Ensure this value has at most 200 characters.");
    }
    let slug = required_text(&mut errors, "slug", &input.slug);
    if !slug.is_empty() && !slug.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        errors.add("slug", "Enter a valid “slug” consisting of letters, numbers, underscores or hyphens.");
    }
    let description = required_text(&mut errors, "description", &input.description);
    errors.into_result(crate::models::NewGroup { title, slug, description })
}
