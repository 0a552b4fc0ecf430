use chrono::{DateTime, Utc};
use db::models::NotificationType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One named field that changed on a `MANGA_UPDATE` event, carrying old
/// and new values as free-form JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Value,
    pub new: Value,
}

/// The three inbound change-event kinds. `NEW_MANGA`, `NEW_CHAPTER`, and
/// `MANGA_UPDATE` share one envelope (type, catalog id, title, message,
/// timestamp); `data`/`changes` are the only shape-specific extension
/// points, left free-form so new fields don't require a schema change here.
#[derive(Debug, Clone)]
pub enum Event {
    NewManga {
        catalog_id: i32,
        title: String,
    },
    NewChapter {
        catalog_id: i32,
        title: String,
        chapter_number: String,
        previous_chapter: Option<String>,
    },
    MangaUpdate {
        catalog_id: i32,
        title: String,
        changes: Vec<FieldChange>,
    },
}

impl Event {
    pub fn catalog_id(&self) -> i32 {
        match self {
            Event::NewManga { catalog_id, .. } => *catalog_id,
            Event::NewChapter { catalog_id, .. } => *catalog_id,
            Event::MangaUpdate { catalog_id, .. } => *catalog_id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Event::NewManga { title, .. } => title,
            Event::NewChapter { title, .. } => title,
            Event::MangaUpdate { title, .. } => title,
        }
    }

    /// The `notifications.notification_type` wire string for this event
    /// kind. Kept in lockstep with `db::models::NotificationType` (see the
    /// `type_name_matches_notification_type` test below) rather than
    /// deriving from it directly, since `NotificationType::as_ref()`
    /// borrows from a temporary and can't hand back a `&'static str`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::NewManga { .. } => "NEW_MANGA",
            Event::NewChapter { .. } => "NEW_CHAPTER",
            Event::MangaUpdate { .. } => "MANGA_UPDATE",
        }
    }

    /// A short human-readable line for the Stored Notification `message`
    /// column, distinct from the machine-readable envelope below.
    pub fn message(&self) -> String {
        match self {
            Event::NewManga { title, .. } => format!("{title} was added to the catalog"),
            Event::NewChapter {
                title,
                chapter_number,
                ..
            } => format!("{title} chapter {chapter_number} is available"),
            Event::MangaUpdate { title, changes, .. } => {
                format!("{title} was updated ({} field(s) changed)", changes.len())
            }
        }
    }

    /// Marshals the outbound subscriber datagram envelope once, shared by
    /// every recipient's send.
    pub fn to_envelope(&self) -> EventEnvelope {
        let (data, changes) = match self {
            Event::NewManga { .. } => (None, None),
            Event::NewChapter {
                chapter_number,
                previous_chapter,
                ..
            } => (
                Some(serde_json::json!({
                    "chapter": chapter_number,
                    "previous_chapter": previous_chapter,
                })),
                None,
            ),
            Event::MangaUpdate { changes, .. } => (None, Some(changes.clone())),
        };

        EventEnvelope {
            r#type: self.type_name(),
            manga_id: self.catalog_id(),
            title: self.title().to_string(),
            message: self.message(),
            timestamp: Utc::now(),
            data,
            changes,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub r#type: &'static str,
    pub manga_id: i32,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<FieldChange>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_name_matches_notification_type() {
        let new_manga = Event::NewManga {
            catalog_id: 1,
            title: "Alpha".to_string(),
        };
        assert_eq!(new_manga.type_name(), NotificationType::NewManga.to_string());

        let new_chapter = Event::NewChapter {
            catalog_id: 1,
            title: "Alpha".to_string(),
            chapter_number: "1".to_string(),
            previous_chapter: None,
        };
        assert_eq!(new_chapter.type_name(), NotificationType::NewChapter.to_string());

        let update = Event::MangaUpdate {
            catalog_id: 1,
            title: "Alpha".to_string(),
            changes: vec![],
        };
        assert_eq!(update.type_name(), NotificationType::MangaUpdate.to_string());
    }

    #[test]
    fn new_manga_envelope_has_no_data_or_changes() {
        let event = Event::NewManga {
            catalog_id: 1,
            title: "Alpha".to_string(),
        };
        let envelope = event.to_envelope();
        assert_eq!(envelope.r#type, "NEW_MANGA");
        assert_eq!(envelope.manga_id, 1);
        assert!(envelope.data.is_none());
        assert!(envelope.changes.is_none());

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("data").is_none());
        assert!(json.get("changes").is_none());
    }

    #[test]
    fn new_chapter_envelope_carries_chapter_data() {
        let event = Event::NewChapter {
            catalog_id: 10,
            title: "Bravo".to_string(),
            chapter_number: "181".to_string(),
            previous_chapter: Some("180".to_string()),
        };
        let envelope = event.to_envelope();
        assert_eq!(envelope.r#type, "NEW_CHAPTER");
        assert_eq!(envelope.data.as_ref().unwrap()["chapter"], "181");
        assert_eq!(envelope.data.as_ref().unwrap()["previous_chapter"], "180");
        assert!(envelope.changes.is_none());
    }

    #[test]
    fn manga_update_envelope_carries_field_changes() {
        let event = Event::MangaUpdate {
            catalog_id: 3,
            title: "Charlie".to_string(),
            changes: vec![FieldChange {
                field: "status".to_string(),
                old: Value::String("ongoing".to_string()),
                new: Value::String("completed".to_string()),
            }],
        };
        let envelope = event.to_envelope();
        assert_eq!(envelope.r#type, "MANGA_UPDATE");
        assert!(envelope.data.is_none());
        let changes = envelope.changes.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "status");
    }

    #[test]
    fn message_summarizes_each_event_kind() {
        let new_manga = Event::NewManga {
            catalog_id: 1,
            title: "Alpha".to_string(),
        };
        assert_eq!(new_manga.message(), "Alpha was added to the catalog");

        let new_chapter = Event::NewChapter {
            catalog_id: 1,
            title: "Alpha".to_string(),
            chapter_number: "5".to_string(),
            previous_chapter: None,
        };
        assert_eq!(new_chapter.message(), "Alpha chapter 5 is available");

        let update = Event::MangaUpdate {
            catalog_id: 1,
            title: "Alpha".to_string(),
            changes: vec![
                FieldChange {
                    field: "title".to_string(),
                    old: Value::Null,
                    new: Value::Null,
                },
                FieldChange {
                    field: "status".to_string(),
                    old: Value::Null,
                    new: Value::Null,
                },
            ],
        };
        assert_eq!(update.message(), "Alpha was updated (2 field(s) changed)");
    }
}
