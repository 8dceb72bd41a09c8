//! SQLite metadata catalog

use super::traits::{Account, CatalogError, CatalogResult, InferenceModel, MetadataCatalog, OpenCatalog};
use crate::messages::DataType;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed catalog
///
/// Two tables, `accounts` and `inference_models`, with a secondary index
/// on `inference_models(account_id)` for the fan-out listing. The worker
/// side only reads; the inherent `upsert_*`/`remove_*` methods exist for
/// administration.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    fn init_schema(conn: &Connection) -> CatalogResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS inference_models (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                name TEXT NOT NULL,
                endpoint_uri TEXT NOT NULL,
                input_data_type TEXT NOT NULL,
                output_data_type TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_models_account
                ON inference_models(account_id);

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn from_connection(conn: Connection) -> CatalogResult<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> CatalogResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CatalogError::Unavailable("catalog connection poisoned".to_string()))
    }

    fn row_to_model(row: &Row<'_>) -> rusqlite::Result<(InferenceModel, String, String)> {
        let input: String = row.get(4)?;
        let output: String = row.get(5)?;
        let model = InferenceModel {
            id: row.get(0)?,
            account_id: row.get(1)?,
            name: row.get(2)?,
            endpoint_uri: row.get(3)?,
            // Placeholders, replaced by `parse_model` once the data types parse.
            input_data_type: DataType::Dcm,
            output_data_type: DataType::Dcm,
        };
        Ok((model, input, output))
    }

    fn parse_model((mut model, input, output): (InferenceModel, String, String)) -> CatalogResult<InferenceModel> {
        model.input_data_type = input
            .parse()
            .map_err(|e: String| CatalogError::InvalidRecord(format!("model {}: {}", model.id, e)))?;
        model.output_data_type = output
            .parse()
            .map_err(|e: String| CatalogError::InvalidRecord(format!("model {}: {}", model.id, e)))?;
        Ok(model)
    }

    // === Administration ===

    /// Create or update an account
    pub fn upsert_account(&self, account: &Account) -> CatalogResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO accounts (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![account.id, account.name],
        )?;
        Ok(())
    }

    /// Create or update a model registration. The owning account must exist.
    pub fn upsert_model(&self, model: &InferenceModel) -> CatalogResult<()> {
        let conn = self.lock()?;
        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM accounts WHERE id = ?1",
                params![model.account_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(CatalogError::AccountNotFound(model.account_id.clone()));
        }
        conn.execute(
            "INSERT INTO inference_models
                (id, account_id, name, endpoint_uri, input_data_type, output_data_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                account_id = excluded.account_id,
                name = excluded.name,
                endpoint_uri = excluded.endpoint_uri,
                input_data_type = excluded.input_data_type,
                output_data_type = excluded.output_data_type",
            params![
                model.id,
                model.account_id,
                model.name,
                model.endpoint_uri,
                model.input_data_type.as_str(),
                model.output_data_type.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Remove a model registration
    pub fn remove_model(&self, id: &str) -> CatalogResult<bool> {
        let conn = self.lock()?;
        let n = conn.execute("DELETE FROM inference_models WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// List all accounts
    pub fn list_accounts(&self) -> CatalogResult<Vec<Account>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name FROM accounts ORDER BY id")?;
        let accounts = stmt
            .query_map([], |row| {
                Ok(Account {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }
}

impl OpenCatalog for SqliteCatalog {
    fn open(path: impl AsRef<Path>) -> CatalogResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    fn open_in_memory() -> CatalogResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }
}

#[async_trait]
impl MetadataCatalog for SqliteCatalog {
    async fn get_account(&self, id: &str) -> CatalogResult<Account> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name FROM accounts WHERE id = ?1",
            params![id],
            |row| {
                Ok(Account {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| CatalogError::AccountNotFound(id.to_string()))
    }

    async fn get_inference_model(&self, id: &str) -> CatalogResult<InferenceModel> {
        let raw = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT id, account_id, name, endpoint_uri, input_data_type, output_data_type
                 FROM inference_models WHERE id = ?1",
                params![id],
                Self::row_to_model,
            )
            .optional()?
        };
        match raw {
            Some(raw) => Self::parse_model(raw),
            None => Err(CatalogError::ModelNotFound(id.to_string())),
        }
    }

    async fn list_inference_models(&self, account_id: &str) -> CatalogResult<Vec<InferenceModel>> {
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(
                "SELECT id, account_id, name, endpoint_uri, input_data_type, output_data_type
                 FROM inference_models WHERE account_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![account_id], Self::row_to_model)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter().map(Self::parse_model).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> SqliteCatalog {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog.upsert_account(&Account::new("A1", "Radiology")).unwrap();
        catalog.upsert_account(&Account::new("A2", "Empty")).unwrap();
        catalog
            .upsert_model(&InferenceModel::new("M1", "A1", "http://m1/infer", DataType::Dcm, DataType::Png))
            .unwrap();
        catalog
            .upsert_model(&InferenceModel::new("M2", "A1", "http://m2/infer", DataType::Jpeg, DataType::Json))
            .unwrap();
        catalog
    }

    #[tokio::test]
    async fn lists_models_for_account() {
        let catalog = seeded();

        let mut ids: Vec<String> = catalog
            .list_inference_models("A1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        ids.sort();

        assert_eq!(ids, vec!["M1", "M2"]);
    }

    #[tokio::test]
    async fn empty_listing_is_not_an_error() {
        let catalog = seeded();
        assert!(catalog.list_inference_models("A2").await.unwrap().is_empty());
        assert!(catalog.list_inference_models("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn model_lookup_round_trips_data_types() {
        let catalog = seeded();

        let m2 = catalog.get_inference_model("M2").await.unwrap();
        assert_eq!(m2.input_data_type, DataType::Jpeg);
        assert_eq!(m2.output_data_type, DataType::Json);
        assert_eq!(m2.endpoint_uri, "http://m2/infer");
    }

    #[tokio::test]
    async fn missing_lookups_are_not_found() {
        let catalog = seeded();

        let err = catalog.get_inference_model("M9").await.unwrap_err();
        assert!(err.is_not_found());
        let err = catalog.get_account("A9").await.unwrap_err();
        assert!(matches!(err, CatalogError::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn unparseable_data_type_is_invalid_record() {
        let catalog = seeded();
        catalog
            .conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO inference_models VALUES ('M3', 'A1', 'M3', 'http://m3', 'tiff', 'png')",
                [],
            )
            .unwrap();

        let err = catalog.get_inference_model("M3").await.unwrap_err();
        assert!(matches!(err, CatalogError::InvalidRecord(_)));
        assert!(err.is_permanent());
        let err = catalog.list_inference_models("A1").await.unwrap_err();
        assert!(matches!(err, CatalogError::InvalidRecord(_)));
    }

    #[test]
    fn model_requires_existing_account() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let err = catalog
            .upsert_model(&InferenceModel::new("M1", "ghost", "http://m", DataType::Dcm, DataType::Dcm))
            .unwrap_err();
        assert!(matches!(err, CatalogError::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn upsert_moves_model_between_accounts() {
        let catalog = seeded();
        catalog
            .upsert_model(&InferenceModel::new("M2", "A2", "http://m2/v2", DataType::Jpeg, DataType::Json))
            .unwrap();

        assert_eq!(catalog.list_inference_models("A1").await.unwrap().len(), 1);
        assert_eq!(catalog.list_inference_models("A2").await.unwrap().len(), 1);
        assert!(catalog.remove_model("M2").unwrap());
        assert!(!catalog.remove_model("M2").unwrap());
    }
}
