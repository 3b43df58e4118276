//! YAML job description for the `bulkload` binary.
//!
//! ```yaml
//! table: events
//! staging_path: /data/staging/events
//! store_root: /data/store
//! region_count: 40
//! compression: snappy
//! mapper:
//!   shape: delimited
//!   width: 4
//!   identity: [0, 1, 2, 3]
//!   delimiter: ","
//! ```

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    key::{SaltStrategy, DEFAULT_REGION_COUNT},
    mapper::{
        ColumnarMapper, DelimitedMapper, Mapper, MapperError, TaggedMapper, CSV_DELIMITER,
    },
    mutation::Families,
    ondisk::SsTableCompression,
    option::LoadOption,
    partition::{BoundaryError, PartitionBoundary},
    record::RecordSchema,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] io::Error),
    #[error("config yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("config mapper error: {0}")]
    Mapper(#[from] MapperError),
    #[error("config boundary error: {0}")]
    Boundary(#[from] BoundaryError),
    #[error("config hex error: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("config invalid: {0}")]
    Invalid(String),
}

fn default_region_count() -> u32 {
    DEFAULT_REGION_COUNT
}

fn default_max_row_group_size() -> usize {
    64 * 1024
}

fn default_batch_rows() -> usize {
    8 * 1024
}

fn default_staging_permissions() -> u32 {
    0o777
}

fn default_commit_attempts() -> usize {
    3
}

fn default_delimiter() -> char {
    CSV_DELIMITER
}

fn default_record_delimiter() -> String {
    "\n".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub table: String,
    pub staging_path: PathBuf,
    /// Root directory of the local partition store.
    pub store_root: PathBuf,
    #[serde(default = "default_region_count")]
    pub region_count: u32,
    #[serde(default)]
    pub max_partitions: Option<usize>,
    #[serde(default)]
    pub families: Families,
    #[serde(default)]
    pub compression: SsTableCompression,
    #[serde(default = "default_max_row_group_size")]
    pub max_row_group_size: usize,
    #[serde(default = "default_batch_rows")]
    pub batch_rows: usize,
    #[serde(default)]
    pub salt_strategy: SaltStrategy,
    #[serde(default = "default_staging_permissions")]
    pub staging_permissions: u32,
    #[serde(default = "default_commit_attempts")]
    pub commit_attempts: usize,
    /// Hex split points used when the table does not exist yet; one partition
    /// per salt value when absent.
    #[serde(default)]
    pub split_points: Option<Vec<String>>,
    pub mapper: MapperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum MapperConfig {
    Delimited {
        width: usize,
        identity: [usize; 4],
        #[serde(default = "default_delimiter")]
        delimiter: char,
        #[serde(default)]
        empty_as_null: bool,
        #[serde(default)]
        column_names: Option<Vec<String>>,
        /// Separator between records in an input file.
        #[serde(default = "default_record_delimiter")]
        record_delimiter: String,
    },
    Columnar {
        width: usize,
        identity: [usize; 4],
        #[serde(default)]
        column_names: Option<Vec<String>>,
    },
    Tagged {
        schema: RecordSchema,
        identity: [String; 4],
    },
}

impl JobConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: JobConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_yaml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table.is_empty() {
            return Err(ConfigError::Invalid("table must not be empty".to_string()));
        }
        if !(1..=u16::MAX as u32 + 1).contains(&self.region_count) {
            return Err(ConfigError::Invalid(format!(
                "region_count {} outside 1..=65536",
                self.region_count
            )));
        }
        if self.max_partitions == Some(0) {
            return Err(ConfigError::Invalid(
                "max_partitions must be at least 1".to_string(),
            ));
        }
        if self.commit_attempts == 0 || self.batch_rows == 0 || self.max_row_group_size == 0 {
            return Err(ConfigError::Invalid(
                "commit_attempts, batch_rows and max_row_group_size must be positive".to_string(),
            ));
        }
        if self.families.current.is_empty()
            || self.families.history.is_empty()
            || self.families.current == self.families.history
        {
            return Err(ConfigError::Invalid(
                "column families must be distinct and non-empty".to_string(),
            ));
        }
        if let MapperConfig::Delimited {
            record_delimiter, ..
        } = &self.mapper
        {
            if record_delimiter.is_empty() {
                return Err(ConfigError::Invalid(
                    "record_delimiter must not be empty".to_string(),
                ));
            }
        }
        self.mapper()?;
        self.boundary()?;
        Ok(())
    }

    pub fn load_option(&self) -> LoadOption {
        let option = LoadOption::new(&self.table, &self.staging_path)
            .region_count(self.region_count)
            .families(self.families.clone())
            .compression(self.compression)
            .max_row_group_size(self.max_row_group_size)
            .batch_rows(self.batch_rows)
            .salt_strategy(self.salt_strategy)
            .staging_permissions(self.staging_permissions)
            .commit_attempts(self.commit_attempts);
        match self.max_partitions {
            Some(max_partitions) => option.max_partitions(max_partitions),
            None => option,
        }
    }

    pub fn mapper(&self) -> Result<Mapper, ConfigError> {
        let key_builder = self.load_option().key_builder();
        let mapper = match &self.mapper {
            MapperConfig::Delimited {
                width,
                identity,
                delimiter,
                empty_as_null,
                column_names,
                ..
            } => {
                let mapper = DelimitedMapper::new(*width, *identity, key_builder)?
                    .with_delimiter(*delimiter)
                    .empty_as_null(*empty_as_null);
                let mapper = match column_names {
                    Some(names) => mapper.with_column_names(names)?,
                    None => mapper,
                };
                Mapper::Delimited(mapper)
            }
            MapperConfig::Columnar {
                width,
                identity,
                column_names,
            } => {
                let mapper = ColumnarMapper::new(*width, *identity, key_builder)?;
                let mapper = match column_names {
                    Some(names) => mapper.with_column_names(names)?,
                    None => mapper,
                };
                Mapper::Columnar(mapper)
            }
            MapperConfig::Tagged { schema, identity } => Mapper::Tagged(TaggedMapper::new(
                Arc::new(schema.clone()),
                [
                    identity[0].as_str(),
                    identity[1].as_str(),
                    identity[2].as_str(),
                    identity[3].as_str(),
                ],
                key_builder,
            )?),
        };
        Ok(mapper)
    }

    /// Partitions to create the table with when it does not exist.
    pub fn boundary(&self) -> Result<PartitionBoundary, ConfigError> {
        match &self.split_points {
            Some(points) => {
                let points = points
                    .iter()
                    .map(hex::decode)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(PartitionBoundary::from_split_points(points)?)
            }
            None => Ok(PartitionBoundary::salted(self.region_count)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, JobConfig, MapperConfig};
    use crate::{
        key::SaltStrategy, mapper::RecordMapper, ondisk::SsTableCompression, record::RecordShape,
    };

    const DELIMITED: &str = r#"
table: events
staging_path: /tmp/staging
store_root: /tmp/store
region_count: 8
compression: zstd
salt_strategy: wall_clock
mapper:
  shape: delimited
  width: 4
  identity: [0, 1, 2, 3]
  delimiter: "|"
"#;

    #[test]
    fn parses_with_defaults() {
        let config = JobConfig::from_yaml_str(DELIMITED).unwrap();
        assert_eq!(config.compression, SsTableCompression::Zstd);
        assert_eq!(config.salt_strategy, SaltStrategy::WallClock);
        assert_eq!(config.commit_attempts, 3);
        assert_eq!(config.staging_permissions, 0o777);
        assert_eq!(&*config.families.current, "c");
        assert!(matches!(
            &config.mapper,
            MapperConfig::Delimited { record_delimiter, .. } if record_delimiter == "\n"
        ));

        let option = config.load_option();
        assert_eq!(option.table(), "events");
        assert_eq!(option.partition_limit(), 8);
        assert_eq!(config.boundary().unwrap().len(), 8);

        let mapper = config.mapper().unwrap();
        assert_eq!(mapper.shape(), RecordShape::Delimited);
    }

    #[test]
    fn tagged_mapper_and_split_points() {
        let config = JobConfig::from_yaml_str(
            r#"
table: accounts
staging_path: /tmp/staging
store_root: /tmp/store
split_points: ["6d", "7a"]
mapper:
  shape: tagged
  schema:
    name: account
    fields: [id, owner, region, year, status]
  identity: [owner, region, year, status]
"#,
        )
        .unwrap();
        assert_eq!(config.boundary().unwrap().len(), 3);
        assert_eq!(config.mapper().unwrap().shape(), RecordShape::SchemaTagged);
    }

    #[test]
    fn rejects_invalid_settings() {
        let bad_identity = DELIMITED.replace("[0, 1, 2, 3]", "[0, 1, 2, 9]");
        assert!(matches!(
            JobConfig::from_yaml_str(&bad_identity),
            Err(ConfigError::Mapper(_))
        ));

        let bad_regions = DELIMITED.replace("region_count: 8", "region_count: 0");
        assert!(matches!(
            JobConfig::from_yaml_str(&bad_regions),
            Err(ConfigError::Invalid(_))
        ));

        let unknown = format!("{DELIMITED}retries: 3\n");
        assert!(matches!(
            JobConfig::from_yaml_str(&unknown),
            Err(ConfigError::Yaml(_))
        ));
    }
}
