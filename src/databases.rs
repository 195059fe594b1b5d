use crate::database::{Database, DbError};
use crate::modules::monitor::database::MonitorDatabase;

pub struct Databases {
    pub monitor: Database<MonitorDatabase>,
}

impl Databases {
    pub async fn open(data_path: &str) -> Result<Self, DbError> {
        Ok(Self {
            monitor: Database::new(data_path).await?,
        })
    }
}
