//! Request dispatch and response envelopes

use crate::engine::{FileContent, FileManager, ListFilter, UploadItem};
use crate::{FmError, Result};
use fm_fs::Storage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One client request, keyed by `mode`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Request {
    Initiate,
    GetFile {
        path: String,
    },
    GetFolder {
        path: String,
        #[serde(default, rename = "type")]
        filter: Option<String>,
    },
    AddFolder {
        path: String,
        name: String,
    },
    Rename {
        old: String,
        new: String,
    },
    Move {
        old: String,
        new: String,
    },
    Copy {
        source: String,
        target: String,
    },
    Delete {
        path: String,
    },
    GetImage {
        path: String,
        #[serde(default)]
        thumbnail: bool,
    },
    ReadFile {
        path: String,
    },
    Download {
        path: String,
    },
    EditFile {
        path: String,
    },
    SaveFile {
        path: String,
        content: String,
    },
    Upload {
        path: String,
        files: Vec<UploadFile>,
    },
    Replace {
        path: String,
        file: UploadFile,
    },
    Extract {
        source: String,
        target: String,
    },
    Summarize,
}

impl Request {
    pub fn from_json(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| FmError::Server(format!("Malformed request: {}", e)))
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Request::Initiate => "initiate",
            Request::GetFile { .. } => "getfile",
            Request::GetFolder { .. } => "getfolder",
            Request::AddFolder { .. } => "addfolder",
            Request::Rename { .. } => "rename",
            Request::Move { .. } => "move",
            Request::Copy { .. } => "copy",
            Request::Delete { .. } => "delete",
            Request::GetImage { .. } => "getimage",
            Request::ReadFile { .. } => "readfile",
            Request::Download { .. } => "download",
            Request::EditFile { .. } => "editfile",
            Request::SaveFile { .. } => "savefile",
            Request::Upload { .. } => "upload",
            Request::Replace { .. } => "replace",
            Request::Extract { .. } => "extract",
            Request::Summarize => "summarize",
        }
    }

    /// Whether the request changes the tree
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Request::AddFolder { .. }
                | Request::Rename { .. }
                | Request::Move { .. }
                | Request::Copy { .. }
                | Request::Delete { .. }
                | Request::SaveFile { .. }
                | Request::Upload { .. }
                | Request::Replace { .. }
                | Request::Extract { .. }
        )
    }
}

/// Uploaded file as it arrives in a request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadFile {
    pub name: String,
    pub content: UploadContent,
}

/// Text content, or raw bytes as a JSON array of numbers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum UploadContent {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<UploadFile> for UploadItem {
    fn from(file: UploadFile) -> Self {
        let content = match file.content {
            UploadContent::Text(text) => text.into_bytes(),
            UploadContent::Bytes(bytes) => bytes,
        };
        UploadItem {
            name: file.name,
            content,
        }
    }
}

/// Result of a dispatched request
#[derive(Debug, Clone)]
pub enum Payload {
    Json(Value),
    /// Streamed to the client as-is, never JSON-encoded
    Binary {
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

impl From<FileContent> for Payload {
    fn from(content: FileContent) -> Self {
        Payload::Binary {
            file_name: content.file_name,
            mime: content.mime,
            bytes: content.bytes,
        }
    }
}

/// Routes requests to one file manager
pub struct Dispatcher<'a, S: Storage> {
    manager: &'a FileManager<S>,
}

impl<'a, S: Storage> Dispatcher<'a, S> {
    pub fn new(manager: &'a FileManager<S>) -> Self {
        Self { manager }
    }

    pub fn dispatch(&self, request: Request) -> Result<Payload> {
        let fm = self.manager;
        if request.is_mutation() {
            tracing::info!("Dispatching {}", request.mode());
        } else {
            tracing::debug!("Dispatching {}", request.mode());
        }

        let payload = match request {
            Request::Initiate => json_payload(fm.initiate()?)?,
            Request::GetFile { path } => json_payload(fm.get_file(&path)?)?,
            Request::GetFolder { path, filter } => {
                json_payload(fm.get_folder(&path, ListFilter::from_param(filter.as_deref()))?)?
            }
            Request::AddFolder { path, name } => json_payload(fm.add_folder(&path, &name)?)?,
            Request::Rename { old, new } => json_payload(fm.rename(&old, &new)?)?,
            Request::Move { old, new } => json_payload(fm.move_entry(&old, &new)?)?,
            Request::Copy { source, target } => json_payload(fm.copy_entry(&source, &target)?)?,
            Request::Delete { path } => json_payload(fm.delete(&path)?)?,
            Request::GetImage { path, thumbnail } => fm.get_image(&path, thumbnail)?.into(),
            Request::ReadFile { path } => fm.read_file(&path)?.into(),
            Request::Download { path } => fm.download(&path)?.into(),
            Request::EditFile { path } => json_payload(fm.edit_file(&path)?)?,
            Request::SaveFile { path, content } => json_payload(fm.save_file(&path, &content)?)?,
            Request::Upload { path, files } => {
                let items = files.into_iter().map(UploadItem::from).collect();
                json_payload(fm.upload(&path, items)?)?
            }
            Request::Replace { path, file } => json_payload(fm.replace(&path, file.into())?)?,
            Request::Extract { source, target } => json_payload(fm.extract(&source, &target)?)?,
            Request::Summarize => json_payload(fm.summarize()?)?,
        };

        Ok(payload)
    }

    /// Parse, dispatch and wrap one JSON request
    pub fn handle_json(&self, line: &str) -> Result<Payload> {
        let request = Request::from_json(line)?;
        self.dispatch(request)
    }
}

fn json_payload<T: Serialize>(value: T) -> Result<Payload> {
    serde_json::to_value(value)
        .map(Payload::Json)
        .map_err(|e| FmError::Server(e.to_string()))
}

/// `{"data": ...}`
pub fn success_envelope(data: Value) -> Value {
    json!({ "data": data })
}

/// `{"errors": [...]}`
pub fn error_envelope(error: &FmError) -> Value {
    json!({ "errors": [error.payload()] })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FmConfig;

    fn manager() -> (tempfile::TempDir, FileManager) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FmConfig::default();
        config.storage.server_root = dir.path().to_path_buf();
        (dir, FileManager::new(config).unwrap())
    }

    #[test]
    fn test_parse_requests() {
        assert_eq!(
            Request::from_json(r#"{"mode":"getfolder","path":"/","type":"images"}"#).unwrap(),
            Request::GetFolder {
                path: "/".into(),
                filter: Some("images".into())
            }
        );
        assert_eq!(
            Request::from_json(r#"{"mode":"summarize"}"#).unwrap(),
            Request::Summarize
        );

        let upload = Request::from_json(
            r#"{"mode":"upload","path":"/","files":[{"name":"a.txt","content":"hi"},{"name":"b.bin","content":[0,1,2]}]}"#,
        )
        .unwrap();
        match upload {
            Request::Upload { files, .. } => {
                assert_eq!(files[0].content, UploadContent::Text("hi".into()));
                assert_eq!(files[1].content, UploadContent::Bytes(vec![0, 1, 2]));
            }
            other => panic!("unexpected request {:?}", other),
        }

        assert!(Request::from_json(r#"{"mode":"format_disk"}"#).is_err());
        assert!(Request::from_json("not json").is_err());
    }

    #[test]
    fn test_dispatch_json_and_binary() {
        let (_dir, fm) = manager();
        let dispatcher = Dispatcher::new(&fm);

        let created = dispatcher
            .handle_json(r#"{"mode":"addfolder","path":"/","name":"docs"}"#)
            .unwrap();
        match created {
            Payload::Json(value) => {
                assert_eq!(value["id"], "/docs/");
                assert_eq!(value["type"], "folder");
            }
            other => panic!("expected json, got {:?}", other),
        }

        dispatcher
            .handle_json(r#"{"mode":"upload","path":"/docs/","files":[{"name":"a.txt","content":"hello"}]}"#)
            .unwrap();

        match dispatcher
            .handle_json(r#"{"mode":"readfile","path":"/docs/a.txt"}"#)
            .unwrap()
        {
            Payload::Binary {
                file_name,
                mime,
                bytes,
            } => {
                assert_eq!(file_name, "a.txt");
                assert_eq!(mime, "text/plain");
                assert_eq!(bytes, b"hello");
            }
            other => panic!("expected binary, got {:?}", other),
        }
    }

    #[test]
    fn test_envelopes() {
        let err = FmError::ForbiddenName("x.exe".into());
        assert_eq!(
            error_envelope(&err),
            json!({"errors": [{"code": "ForbiddenName", "title": "FORBIDDEN_NAME", "arguments": ["x.exe"]}]})
        );
        assert_eq!(success_envelope(json!([])), json!({"data": []}));
    }

    #[test]
    fn test_mutations_are_flagged() {
        assert!(Request::Delete { path: "/a".into() }.is_mutation());
        assert!(!Request::Summarize.is_mutation());
    }
}
