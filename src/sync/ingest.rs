//! Picker selection handling
//!
//! Groups a flat selection by reported parent, confirms access to each
//! parent one at a time and names the synthesized folders.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::drive::types::{audio_mime_for, classify};
use crate::drive::{FileEntry, PickedItem, PickerIngest};

/// Group for items the picker reported without a parent
pub const UNFILED_ID: &str = "picker-unfiled";

const UNFILED_NAME: &str = "Unfiled";

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Counts from one ingestion pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Parent folders created or extended
    pub folders: usize,
    pub ingested: usize,
    pub failed: usize,
}

/// Items keyed by parent id, in id order
pub fn group_by_parent(items: Vec<PickedItem>) -> BTreeMap<String, Vec<PickedItem>> {
    let mut groups: BTreeMap<String, Vec<PickedItem>> = BTreeMap::new();
    for item in items {
        let parent = item
            .parent_id
            .clone()
            .unwrap_or_else(|| UNFILED_ID.to_string());
        groups.entry(parent).or_default().push(item);
    }
    groups
}

/// Map a picked item to an entry under `parent_id`
pub fn map_picked(item: &PickedItem, parent_id: &str) -> FileEntry {
    let is_folder = item.mime_type == FOLDER_MIME;
    let entry = classify(&item.id, &item.name, Some(parent_id.to_string()), is_folder);
    // Trust the reported type when the name has no known extension
    if !is_folder && audio_mime_for(&item.name).is_none() && item.mime_type.starts_with("audio/") {
        return FileEntry::track(
            &item.id,
            &item.name,
            Some(parent_id.to_string()),
            &item.mime_type,
        );
    }
    entry
}

/// Name for a parent nobody supplied one for
pub fn fallback_name(parent_id: &str) -> String {
    if parent_id == UNFILED_ID {
        UNFILED_NAME.to_string()
    } else {
        parent_id.to_string()
    }
}

fn placeholder_name(declined: usize) -> String {
    format!("Shared folder {}", declined)
}

/// Confirm access to each parent and pick its display name.
///
/// Every parent gets a name. Declined or failed checks fall back to a
/// numbered placeholder instead of dropping the folder.
pub async fn resolve_parent_names<'a, I>(
    picker: &dyn PickerIngest,
    parents: I,
) -> HashMap<String, String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut names = HashMap::new();
    let mut declined = 0;

    for parent in parents {
        if parent == UNFILED_ID {
            names.insert(parent.clone(), UNFILED_NAME.to_string());
            continue;
        }

        let name = match picker.check_folder_access(parent).await {
            Ok(access) if access.has_access => access.folder_name,
            Ok(_) => None,
            Err(e) => {
                warn!(folder = %parent, error = %e, "Folder access check failed");
                None
            }
        };
        let name = name.unwrap_or_else(|| {
            declined += 1;
            placeholder_name(declined)
        });

        debug!(folder = %parent, name = %name, "Resolved parent folder");
        names.insert(parent.clone(), name);
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::types::EntryKind;
    use crate::testing::{picked, FakeDrive};

    #[test]
    fn test_group_by_parent() {
        let groups = group_by_parent(vec![
            picked("a", "a.mp3", Some("p2")),
            picked("b", "b.mp3", Some("p1")),
            picked("c", "c.mp3", None),
            picked("d", "d.mp3", Some("p2")),
        ]);
        let keys: Vec<&str> = groups.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["p1", "p2", UNFILED_ID]);
        assert_eq!(groups["p2"].len(), 2);
    }

    #[test]
    fn test_map_picked() {
        let track = map_picked(&picked("a", "a.flac", Some("p")), "p");
        assert!(track.is_track());
        assert_eq!(track.parent_id.as_deref(), Some("p"));

        let mut item = picked("b", "voice-memo", Some("p"));
        item.mime_type = "audio/webm".to_string();
        assert!(matches!(
            map_picked(&item, "p").kind,
            EntryKind::AudioTrack { ref mime_type, .. } if mime_type == "audio/webm"
        ));

        let mut folder = picked("c", "Live", Some("p"));
        folder.mime_type = FOLDER_MIME.to_string();
        assert!(map_picked(&folder, "p").is_folder());

        let mut doc = picked("d", "notes.txt", Some("p"));
        doc.mime_type = "text/plain".to_string();
        assert_eq!(map_picked(&doc, "p").kind, EntryKind::File);
    }

    #[tokio::test]
    async fn test_declined_parents_get_placeholders() {
        let drive = FakeDrive::ingest();
        drive.grant_access("p2", "Tapes");

        let parents = vec![
            "p1".to_string(),
            "p2".to_string(),
            "p3".to_string(),
            UNFILED_ID.to_string(),
        ];
        let names = resolve_parent_names(&drive, &parents).await;

        assert_eq!(names["p1"], "Shared folder 1");
        assert_eq!(names["p2"], "Tapes");
        assert_eq!(names["p3"], "Shared folder 2");
        assert_eq!(names[UNFILED_ID], "Unfiled");
        assert_eq!(drive.access_checks(), 3);
    }
}
