//! Local drive -- an in-memory stand-in for a cloud file store.
//!
//! Holds a tree of folders and files rooted at a pre-existing root folder.
//! Items are never removed, only flagged as trashed, matching how cloud
//! drives treat deletion.  Everything the service returns is plain JSON:
//!
//! ```json
//! { "id": "...", "name": "notes.txt", "kind": "file", "parentId": "root",
//!   "mimeType": "text/plain", "content": "...", "size": 3, "trashed": false,
//!   "createdAt": "...", "updatedAt": "..." }
//! ```

use appvirt_kernel::{CallError, MethodSpec, Service, ServiceManifest};
use appvirt_sandbox::SessionResource;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::args::{optional_str, require_str};

/// Published service name.
pub const DRIVE_SERVICE: &str = "Drive";

/// Id of the pre-existing root folder.
pub const ROOT_FOLDER_ID: &str = "root";

const FOLDER_MIME_TYPE: &str = "application/vnd.folder";
const DEFAULT_FILE_MIME_TYPE: &str = "text/plain";

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum ItemKind {
    File,
    Folder,
}

impl ItemKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DriveItem {
    id: String,
    name: String,
    kind: ItemKind,
    parent_id: Option<String>,
    mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    size: usize,
    trashed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DriveItem {
    fn folder(id: String, name: String, parent_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            kind: ItemKind::Folder,
            parent_id,
            mime_type: FOLDER_MIME_TYPE.to_string(),
            content: None,
            size: 0,
            trashed: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn file(id: String, name: String, parent_id: String, content: String, mime_type: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            kind: ItemKind::File,
            parent_id: Some(parent_id),
            mime_type,
            size: content.len(),
            content: Some(content),
            trashed: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// In-memory drive service.
pub struct LocalDrive {
    manifest: ServiceManifest,
    items: DashMap<String, DriveItem>,
}

impl LocalDrive {
    pub fn new() -> Self {
        let items = DashMap::new();
        items.insert(
            ROOT_FOLDER_ID.to_string(),
            DriveItem::folder(ROOT_FOLDER_ID.to_string(), "My Drive".to_string(), None),
        );
        Self {
            manifest: manifest(),
            items,
        }
    }

    /// Add a file that exists before the session starts, bypassing the
    /// service surface.  Returns its id.
    pub fn seed_file(&self, name: &str, content: &str) -> String {
        let id = new_id();
        self.items.insert(
            id.clone(),
            DriveItem::file(
                id.clone(),
                name.to_string(),
                ROOT_FOLDER_ID.to_string(),
                content.to_string(),
                DEFAULT_FILE_MIME_TYPE.to_string(),
            ),
        );
        id
    }

    /// Number of items, including the root and trashed ones.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Whether item `id` exists and is trashed.
    pub fn is_trashed(&self, id: &str) -> bool {
        self.items.get(id).is_some_and(|item| item.trashed)
    }

    fn item(&self, id: &str, kind: Option<ItemKind>) -> Result<DriveItem, CallError> {
        let not_found = || CallError::not_found(kind.map_or("item", |k| k.as_str()), id);
        let item = self.items.get(id).ok_or_else(not_found)?;
        if kind.is_some_and(|k| k != item.kind) {
            return Err(not_found());
        }
        Ok(item.value().clone())
    }

    fn parent_folder(&self, args: &Value, method: &str) -> Result<String, CallError> {
        let parent = optional_str(args, "parentId", method)?.unwrap_or(ROOT_FOLDER_ID);
        let folder = self.item(parent, Some(ItemKind::Folder))?;
        if folder.trashed {
            return Err(CallError::invalid_args(
                method,
                format!("folder `{parent}` is in the trash"),
            ));
        }
        Ok(folder.id)
    }

    fn create_folder(&self, args: &Value) -> Result<Value, CallError> {
        let name = require_str(args, "name", "createFolder")?;
        let parent = self.parent_folder(args, "createFolder")?;
        let item = DriveItem::folder(new_id(), name.to_string(), Some(parent));
        let out = item.to_json();
        debug!(id = %item.id, name, "folder created");
        self.items.insert(item.id.clone(), item);
        Ok(out)
    }

    fn create_file(&self, args: &Value) -> Result<Value, CallError> {
        let name = require_str(args, "name", "createFile")?;
        let content = optional_str(args, "content", "createFile")?.unwrap_or_default();
        let mime_type = optional_str(args, "mimeType", "createFile")?.unwrap_or(DEFAULT_FILE_MIME_TYPE);
        let parent = self.parent_folder(args, "createFile")?;
        let item = DriveItem::file(
            new_id(),
            name.to_string(),
            parent,
            content.to_string(),
            mime_type.to_string(),
        );
        let out = item.to_json();
        debug!(id = %item.id, name, "file created");
        self.items.insert(item.id.clone(), item);
        Ok(out)
    }

    fn list_folder(&self, args: &Value) -> Result<Value, CallError> {
        let id = require_str(args, "id", "listFolder")?;
        self.item(id, Some(ItemKind::Folder))?;
        let mut children: Vec<DriveItem> = self
            .items
            .iter()
            .filter(|e| !e.trashed && e.parent_id.as_deref() == Some(id))
            .map(|e| e.value().clone())
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(Value::Array(children.iter().map(DriveItem::to_json).collect()))
    }

    /// Apply `change` to item `id` and return its new state.
    fn modify<F>(&self, id: &str, kind: Option<ItemKind>, change: F) -> Result<Value, CallError>
    where
        F: FnOnce(&mut DriveItem),
    {
        let not_found = || CallError::not_found(kind.map_or("item", |k| k.as_str()), id);
        let mut item = self.items.get_mut(id).ok_or_else(not_found)?;
        if kind.is_some_and(|k| k != item.kind) {
            return Err(not_found());
        }
        change(item.value_mut());
        item.updated_at = Utc::now();
        Ok(item.to_json())
    }

    fn update_file(&self, args: &Value) -> Result<Value, CallError> {
        let id = require_str(args, "id", "updateFile")?;
        let content = require_str(args, "content", "updateFile")?.to_string();
        self.modify(id, Some(ItemKind::File), |item| {
            item.size = content.len();
            item.content = Some(content);
        })
    }

    fn rename(&self, args: &Value) -> Result<Value, CallError> {
        let id = require_str(args, "id", "renameFile")?;
        let name = require_str(args, "name", "renameFile")?.to_string();
        self.modify(id, None, |item| item.name = name)
    }

    fn trash(&self, id: &str) -> Result<Value, CallError> {
        if id == ROOT_FOLDER_ID {
            return Err(CallError::invalid_args("trashFile", "the root folder cannot be trashed"));
        }
        self.modify(id, None, |item| item.trashed = true)
    }
}

impl Default for LocalDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for LocalDrive {
    fn name(&self) -> &str {
        DRIVE_SERVICE
    }

    fn manifest(&self) -> &ServiceManifest {
        &self.manifest
    }

    fn property(&self, name: &str) -> Option<Value> {
        match name {
            "rootFolderId" => Some(json!(ROOT_FOLDER_ID)),
            _ => None,
        }
    }

    fn invoke(&self, method: &str, args: &Value) -> Result<Value, CallError> {
        match method {
            "getName" | "toString" => Ok(json!(DRIVE_SERVICE)),
            "getRootFolder" => Ok(self.item(ROOT_FOLDER_ID, Some(ItemKind::Folder))?.to_json()),
            "createFolder" => self.create_folder(args),
            "createFile" => self.create_file(args),
            "getFileById" => {
                let id = require_str(args, "id", method)?;
                Ok(self.item(id, Some(ItemKind::File))?.to_json())
            }
            "getFolderById" => {
                let id = require_str(args, "id", method)?;
                Ok(self.item(id, Some(ItemKind::Folder))?.to_json())
            }
            "listFolder" => self.list_folder(args),
            "updateFile" => self.update_file(args),
            "renameFile" => self.rename(args),
            "trashFile" => {
                let id = require_str(args, "id", method)?;
                self.trash(id)
            }
            other => Err(CallError::Unsupported {
                method: other.to_string(),
            }),
        }
    }

    fn resource_name(&self, id: &str) -> Option<String> {
        self.items.get(id).map(|item| item.name.clone())
    }

    fn trash_resource(&self, resource: &SessionResource) -> Result<(), CallError> {
        self.trash(&resource.id).map(|_| ())
    }
}

/// Members every virtualized object answers.
pub(crate) fn base_manifest() -> ServiceManifest {
    ServiceManifest::new("Object")
        .with_method(MethodSpec::local("getName"))
        .with_method(MethodSpec::local("toString"))
}

fn manifest() -> ServiceManifest {
    ServiceManifest::new(DRIVE_SERVICE)
        .with_method(MethodSpec::read("getRootFolder"))
        .with_method(MethodSpec::create("createFolder", "folder").on_resource("parentId"))
        .with_method(MethodSpec::create("createFile", "file").on_resource("parentId"))
        .with_method(MethodSpec::read("getFileById").on_resource("id").scoped_by("id"))
        .with_method(MethodSpec::read("getFolderById").on_resource("id").scoped_by("id"))
        .with_method(MethodSpec::read("listFolder").on_resource("id"))
        .with_method(MethodSpec::write("updateFile").on_resource("id").scoped_by("id"))
        .with_method(MethodSpec::write("renameFile").on_resource("id").scoped_by("id"))
        .with_method(MethodSpec::delete("trashFile").on_resource("id").scoped_by("id"))
        .with_property("rootFolderId")
        .extending(base_manifest())
}

fn new_id() -> String {
    uuid::Uuid::now_v7().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_exists() {
        let drive = LocalDrive::new();
        let root = drive.invoke("getRootFolder", &json!({})).unwrap();
        assert_eq!(root["id"], ROOT_FOLDER_ID);
        assert_eq!(root["kind"], "folder");
        assert!(root.get("content").is_none());
    }

    #[test]
    fn create_and_fetch_file() {
        let drive = LocalDrive::new();
        let folder = drive
            .invoke("createFolder", &json!({"name": "reports"}))
            .unwrap();
        let folder_id = folder["id"].as_str().unwrap();

        let file = drive
            .invoke(
                "createFile",
                &json!({"name": "q1.csv", "content": "a,b", "parentId": folder_id, "mimeType": "text/csv"}),
            )
            .unwrap();
        let file_id = file["id"].as_str().unwrap();
        assert_eq!(file["size"], 3);
        assert_eq!(file["parentId"], folder_id);

        let fetched = drive.invoke("getFileById", &json!({"id": file_id})).unwrap();
        assert_eq!(fetched["content"], "a,b");
        assert_eq!(fetched["mimeType"], "text/csv");

        // A file is not a folder.
        assert!(matches!(
            drive.invoke("getFolderById", &json!({"id": file_id})),
            Err(CallError::NotFound { .. })
        ));
    }

    #[test]
    fn list_folder_skips_trashed() {
        let drive = LocalDrive::new();
        let a = drive.invoke("createFile", &json!({"name": "a"})).unwrap();
        drive.invoke("createFile", &json!({"name": "b"})).unwrap();
        drive
            .invoke("trashFile", &json!({"id": a["id"]}))
            .unwrap();

        let listing = drive.invoke("listFolder", &json!({"id": "root"})).unwrap();
        let names: Vec<_> = listing
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["b"]);
    }

    #[test]
    fn update_and_rename() {
        let drive = LocalDrive::new();
        let id = drive.seed_file("draft", "v1");

        let updated = drive
            .invoke("updateFile", &json!({"id": id, "content": "version 2"}))
            .unwrap();
        assert_eq!(updated["size"], 9);

        drive
            .invoke("renameFile", &json!({"id": id, "name": "final"}))
            .unwrap();
        assert_eq!(drive.resource_name(&id).as_deref(), Some("final"));
    }

    #[test]
    fn cannot_create_in_trashed_folder_or_trash_root() {
        let drive = LocalDrive::new();
        let folder = drive.invoke("createFolder", &json!({"name": "old"})).unwrap();
        drive.invoke("trashFile", &json!({"id": folder["id"]})).unwrap();

        assert!(matches!(
            drive.invoke("createFile", &json!({"name": "x", "parentId": folder["id"]})),
            Err(CallError::InvalidArguments { .. })
        ));
        assert!(drive.invoke("trashFile", &json!({"id": "root"})).is_err());
    }

    #[test]
    fn missing_arguments_are_reported() {
        let drive = LocalDrive::new();
        let err = drive.invoke("createFile", &json!({})).unwrap_err();
        assert!(err.to_string().contains("`name`"));
    }
}
