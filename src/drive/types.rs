//! File entry model and remote item classification
//!
//! Defines the common entity shape every backend maps into, plus the fixed
//! audio-extension table used to decide which files are tracks.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Known audio extensions and their canonical MIME types
pub const AUDIO_EXTENSIONS: &[(&str, &str)] = &[
    ("aac", "audio/aac"),
    ("mp3", "audio/mpeg"),
    ("ogg", "audio/ogg"),
    ("wav", "audio/wav"),
    ("flac", "audio/flac"),
    ("m4a", "audio/mp4"),
];

/// Tags parsed from an audio blob
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<u32>,
}

impl AudioMetadata {
    /// True when no tag was found
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Shape-specific data of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EntryKind {
    File,
    #[serde(rename_all = "camelCase")]
    Folder {
        /// `None` until the folder has been listed or ingested into
        #[serde(default, skip_serializing_if = "Option::is_none")]
        children_ids: Option<BTreeSet<String>>,
    },
    #[serde(rename_all = "camelCase")]
    AudioTrack {
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<AudioMetadata>,
    },
}

/// A cached file, folder or audio track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Backend-scoped stable id
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(flatten)]
    pub kind: EntryKind,
}

impl FileEntry {
    /// Create a folder entry whose children have not been listed yet
    pub fn folder(
        id: impl Into<String>,
        name: impl Into<String>,
        parent_id: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id,
            kind: EntryKind::Folder { children_ids: None },
        }
    }

    /// Create a generic file entry
    pub fn file(id: impl Into<String>, name: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id,
            kind: EntryKind::File,
        }
    }

    /// Create an audio track entry without parsed metadata
    pub fn track(
        id: impl Into<String>,
        name: impl Into<String>,
        parent_id: Option<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id,
            kind: EntryKind::AudioTrack {
                mime_type: mime_type.into(),
                metadata: None,
            },
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, EntryKind::Folder { .. })
    }

    pub fn is_track(&self) -> bool {
        matches!(self.kind, EntryKind::AudioTrack { .. })
    }

    /// Child ids of a folder that has been listed, `None` otherwise
    pub fn children_ids(&self) -> Option<&BTreeSet<String>> {
        match &self.kind {
            EntryKind::Folder { children_ids } => children_ids.as_ref(),
            _ => None,
        }
    }

    /// Parsed tags of an audio track
    pub fn metadata(&self) -> Option<&AudioMetadata> {
        match &self.kind {
            EntryKind::AudioTrack { metadata, .. } => metadata.as_ref(),
            _ => None,
        }
    }

    /// Fold locally derived fields of `previous` into a freshly mapped entry.
    ///
    /// Remote listings never carry a folder's child pointers or a track's
    /// parsed tags, so those survive a re-sync as long as the kind is the
    /// same. A kind change overwrites.
    pub fn merged_over(mut self, previous: Option<&FileEntry>) -> Self {
        let Some(previous) = previous else {
            return self;
        };
        match (&mut self.kind, &previous.kind) {
            (
                EntryKind::Folder { children_ids },
                EntryKind::Folder {
                    children_ids: old_children,
                },
            ) if children_ids.is_none() => {
                *children_ids = old_children.clone();
            }
            (
                EntryKind::AudioTrack { metadata, .. },
                EntryKind::AudioTrack {
                    metadata: old_metadata,
                    ..
                },
            ) if metadata.is_none() => {
                *metadata = old_metadata.clone();
            }
            _ => {}
        }
        self
    }
}

/// Look up the canonical audio MIME type for a file name
pub fn audio_mime_for(name: &str) -> Option<&'static str> {
    let (_, ext) = name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    AUDIO_EXTENSIONS
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
}

/// Map a remote item to an entry by folder marker, then by extension
pub fn classify(id: &str, name: &str, parent_id: Option<String>, is_folder: bool) -> FileEntry {
    if is_folder {
        return FileEntry::folder(id, name, parent_id);
    }
    match audio_mime_for(name) {
        Some(mime) => FileEntry::track(id, name, parent_id, mime),
        None => FileEntry::file(id, name, parent_id),
    }
}
