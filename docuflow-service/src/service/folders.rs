//! Folders group documents under a case-insensitively unique name.

use chrono::Utc;
use tracing::info;

use crate::db::{Document, Folder, FolderRemoval, FolderRename};
use crate::error::{ServiceError, ServiceResult};
use crate::search::SearchFilters;
use crate::service::DocumentService;

const MAX_FOLDER_NAME_CHARS: usize = 255;

fn folder_name(name: &str) -> ServiceResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::InvalidRequest {
            message: "folder name must not be empty".to_string(),
        });
    }
    if name.chars().count() > MAX_FOLDER_NAME_CHARS {
        return Err(ServiceError::InvalidRequest {
            message: format!("folder name is longer than {MAX_FOLDER_NAME_CHARS} characters"),
        });
    }
    Ok(name.to_string())
}

impl DocumentService {
    pub fn create_folder(&self, name: &str, actor: &str) -> ServiceResult<Folder> {
        let folder = Folder {
            id: uuid::Uuid::new_v4().to_string(),
            name: folder_name(name)?,
            created_by: actor.to_string(),
            created_at: Utc::now(),
            document_count: 0,
        };

        if !self.db.insert_folder(&folder)? {
            return Err(ServiceError::FolderExists { name: folder.name });
        }

        info!(folder_id = %folder.id, name = %folder.name, actor = %actor, "Folder created");
        Ok(folder)
    }

    pub fn list_folders(&self) -> ServiceResult<Vec<Folder>> {
        Ok(self.db.list_folders()?)
    }

    pub fn get_folder(&self, folder_id: &str) -> ServiceResult<Folder> {
        self.db
            .get_folder(folder_id)?
            .ok_or_else(|| ServiceError::FolderNotFound {
                folder_id: folder_id.to_string(),
            })
    }

    pub fn rename_folder(&self, folder_id: &str, name: &str) -> ServiceResult<Folder> {
        let name = folder_name(name)?;
        match self.db.rename_folder(folder_id, &name)? {
            FolderRename::Renamed(folder) => {
                info!(folder_id = %folder_id, name = %folder.name, "Folder renamed");
                Ok(folder)
            }
            FolderRename::NotFound => Err(ServiceError::FolderNotFound {
                folder_id: folder_id.to_string(),
            }),
            FolderRename::NameTaken => Err(ServiceError::FolderExists { name }),
        }
    }

    /// Delete a folder that no longer holds any documents
    pub fn delete_folder(&self, folder_id: &str) -> ServiceResult<()> {
        match self.db.delete_folder(folder_id)? {
            FolderRemoval::Deleted => {
                info!(folder_id = %folder_id, "Folder deleted");
                Ok(())
            }
            FolderRemoval::NotFound => Err(ServiceError::FolderNotFound {
                folder_id: folder_id.to_string(),
            }),
            FolderRemoval::NotEmpty { documents } => Err(ServiceError::FolderNotEmpty {
                folder_id: folder_id.to_string(),
                documents,
            }),
        }
    }

    /// Complete documents filed in a folder, newest first
    pub fn folder_documents(&self, folder_id: &str) -> ServiceResult<Vec<Document>> {
        self.get_folder(folder_id)?;
        self.search(&SearchFilters {
            folder: Some(folder_id.to_string()),
            ..Default::default()
        })
    }
}
