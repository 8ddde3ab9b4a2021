//! Models and routers shared by the integration tests.
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use fastapi_reflect::prelude::*;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clipboard {
    pub text: String,
    #[serde(default)]
    pub day: String,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

impl Model for Clipboard {
    fn shape() -> TypeShape {
        TypeShape::named("clipboard", "Clipboard")
            .describe("text shared between devices")
            .field::<String>("Text", r#"json:"text" validate:"required,max=200" description:"clipboard content""#)
            .field::<String>("Day", r#"json:"day""#)
            .field::<Option<DateTime<Utc>>>("Created", r#"json:"created""#)
    }
}

/// Convention-scanned router: method names carry the verb
#[derive(Default)]
pub struct ClipboardRouter {
    clips: Mutex<Vec<Clipboard>>,
}

impl ClipboardRouter {
    pub fn get_clipboard(
        &self,
        _ctx: &mut Context,
        day: String,
        at: DateTime<Utc>,
    ) -> Result<Option<Clipboard>, HandlerError> {
        let clips = self.clips.lock();
        Ok(clips
            .iter()
            .rev()
            .find(|c| c.day == day && c.created.map_or(true, |created| created <= at))
            .cloned())
    }

    pub fn post_clipboard(
        &self,
        _ctx: &mut Context,
        clip: Option<Clipboard>,
    ) -> Result<i64, HandlerError> {
        let clip = clip.ok_or_else(|| HandlerError::with_status(400, "empty clipboard"))?;
        let mut clips = self.clips.lock();
        clips.push(clip);
        Ok(clips.len() as i64)
    }
}

impl GroupRouter for ClipboardRouter {
    fn prefix(&self) -> &str {
        "/api"
    }

    fn summaries(&self) -> std::collections::HashMap<String, String> {
        let mut summaries = std::collections::HashMap::new();
        summaries.insert("PostClipboard".to_string(), "Save a clip".to_string());
        summaries
    }

    fn methods(self: Arc<Self>) -> Vec<MethodDescriptor> {
        let get = Arc::clone(&self);
        let post = Arc::clone(&self);
        vec![
            MethodDescriptor::new(
                "GetClipboard",
                move |ctx: &mut Context, day: String, at: DateTime<Utc>| get.get_clipboard(ctx, day, at),
            )
            .params(&["day", "at"]),
            MethodDescriptor::new("PostClipboard", move |ctx: &mut Context, clip: Option<Clipboard>| {
                post.post_clipboard(ctx, clip)
            }),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: u32,
    pub title: String,
}

impl Model for Note {
    fn shape() -> TypeShape {
        TypeShape::named("notes", "Note")
            .field::<u32>("Id", r#"json:"id""#)
            .field::<String>("Title", r#"json:"title" validate:"required""#)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteFilter {
    pub keyword: String,
    pub page: u32,
}

impl Model for NoteFilter {
    fn shape() -> TypeShape {
        TypeShape::named("notes", "NoteFilter")
            .field::<String>("Keyword", r#"json:"keyword" validate:"required""#)
            .field::<u32>("Page", r#"json:"page" validate:"lte=100" description:"page number""#)
    }
}

pub fn list_notes(_ctx: &mut Context, filter: NoteFilter) -> Result<Vec<Note>, HandlerError> {
    Ok((0..3)
        .map(|i| Note {
            id: filter.page * 10 + i,
            title: format!("{} {}", filter.keyword, i),
        })
        .collect())
}

pub fn get_note(ctx: &mut Context) -> Result<Note, HandlerError> {
    let id = ctx
        .path_field("id")
        .and_then(|id| id.parse::<u32>().ok())
        .ok_or_else(|| HandlerError::with_status(404, "note not found"))?;
    Ok(Note {
        id,
        title: "found".to_string(),
    })
}

/// Explicitly registered routes
pub fn notes_router() -> Router {
    Router::new("/notes")
        .tags(&["notes"])
        .get("/", list_notes)
        .get("/:id", get_note)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Thing {
    pub size: i64,
}

impl Model for Thing {
    fn shape() -> TypeShape {
        TypeShape::named("things", "Thing").field::<i64>("Size", r#"json:"size""#)
    }
}

/// A POST route whose only argument is a scalar
pub struct ThingRouter;

impl GroupRouter for ThingRouter {
    fn methods(self: Arc<Self>) -> Vec<MethodDescriptor> {
        vec![MethodDescriptor::new(
            "PostCreateThing",
            |_ctx: &mut Context, size: i64| -> Result<Thing, HandlerError> { Ok(Thing { size }) },
        )]
    }
}
