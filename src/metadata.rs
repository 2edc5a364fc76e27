//! Metadata sink (optional). Records brand/image identity and per-stage
//! completion into an external PostgreSQL store with a two-table schema
//! (`brand(id, name)`, `image(id, filename, brand_id, hash,
//! kernel_extracted, rootfs_extracted, kernel_version)`).
//!
//! Compiled in behind the `metadata-sink` feature so a build without a
//! reachable Postgres server doesn't need to link the driver at all; when
//! the feature is off, every operation fails closed with `SinkError` and the
//! caller falls back to hash-based tags, exactly as if the sink were simply
//! unreachable.

use crate::error::Fw2tarError;

/// Connection parameters for the metadata sink. User/password/database are
/// fixed, matching the original tool's hardcoded credentials.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub host: String,
    pub port: u16,
}

/// Whitelisted set of columns the cascade is allowed to update. Restricting
/// this to an enum (rather than taking a field-name string) is what closes
/// the SQL-injection-shaped hole the original Python implementation had via
/// string-concatenated `UPDATE ... SET <field> = ...`.
#[derive(Debug, Clone, Copy)]
pub enum SinkField {
    KernelExtracted,
    RootfsExtracted,
    KernelVersion,
}

impl SinkField {
    fn column(self) -> &'static str {
        match self {
            SinkField::KernelExtracted => "kernel_extracted",
            SinkField::RootfsExtracted => "rootfs_extracted",
            SinkField::KernelVersion => "kernel_version",
        }
    }
}

pub struct MetadataSink {
    #[allow(dead_code)]
    config: SinkConfig,
}

impl MetadataSink {
    pub fn new(config: SinkConfig) -> Self {
        Self { config }
    }

    /// Upserts `brand` by name and `image` by `(filename, brand_id, hash)`,
    /// returning the stable numeric image id (as a string) to use as the
    /// item's tag.
    pub fn generate_tag(
        &self,
        filename: &str,
        checksum: &str,
        brand: Option<&str>,
    ) -> Result<String, Fw2tarError> {
        imp::generate_tag(&self.config, filename, checksum, brand)
    }

    /// Sets one whitelisted field on the `image` row identified by `tag`
    /// (its numeric id). Errors are always recoverable from the caller's
    /// perspective: extraction proceeds without metadata on failure.
    pub fn set_field(&self, tag: &str, field: SinkField, value: &str) -> Result<(), Fw2tarError> {
        imp::set_field(&self.config, tag, field, value)
    }
}

#[cfg(feature = "metadata-sink")]
mod imp {
    use super::{SinkConfig, SinkField};
    use crate::error::Fw2tarError;
    use postgres::{Client, NoTls};

    fn connect(config: &SinkConfig) -> Result<Client, Fw2tarError> {
        let conn_str = format!(
            "host={} port={} user=femu password=femu dbname=firmware",
            config.host, config.port
        );
        Client::connect(&conn_str, NoTls).map_err(sink_err)
    }

    fn sink_err(e: postgres::Error) -> Fw2tarError {
        Fw2tarError::SinkError(e.to_string())
    }

    pub fn generate_tag(
        config: &SinkConfig,
        filename: &str,
        checksum: &str,
        brand: Option<&str>,
    ) -> Result<String, Fw2tarError> {
        let mut client = connect(config)?;
        let brand_name = brand.unwrap_or("unknown");

        let brand_id: i32 = match client
            .query_opt("SELECT id FROM brand WHERE name = $1", &[&brand_name])
            .map_err(sink_err)?
        {
            Some(row) => row.get(0),
            None => client
                .query_one(
                    "INSERT INTO brand (name) VALUES ($1) RETURNING id",
                    &[&brand_name],
                )
                .map_err(sink_err)?
                .get(0),
        };

        let image_id: i32 = match client
            .query_opt(
                "SELECT id FROM image WHERE filename = $1 AND brand_id = $2 AND hash = $3",
                &[&filename, &brand_id, &checksum],
            )
            .map_err(sink_err)?
        {
            Some(row) => row.get(0),
            None => client
                .query_one(
                    "INSERT INTO image (filename, brand_id, hash) VALUES ($1, $2, $3) RETURNING id",
                    &[&filename, &brand_id, &checksum],
                )
                .map_err(sink_err)?
                .get(0),
        };

        Ok(image_id.to_string())
    }

    pub fn set_field(
        config: &SinkConfig,
        tag: &str,
        field: SinkField,
        value: &str,
    ) -> Result<(), Fw2tarError> {
        let image_id: i32 = tag
            .parse()
            .map_err(|_| Fw2tarError::SinkError(format!("tag {tag} is not a numeric image id")))?;
        let mut client = connect(config)?;
        // `field.column()` only ever returns one of the three whitelisted
        // literals above; it is never derived from caller input.
        let sql = format!("UPDATE image SET {} = $1 WHERE id = $2", field.column());
        client.execute(&sql, &[&value, &image_id]).map_err(sink_err)?;
        Ok(())
    }
}

#[cfg(not(feature = "metadata-sink"))]
mod imp {
    use super::{SinkConfig, SinkField};
    use crate::error::Fw2tarError;

    pub fn generate_tag(
        _config: &SinkConfig,
        _filename: &str,
        _checksum: &str,
        _brand: Option<&str>,
    ) -> Result<String, Fw2tarError> {
        Err(Fw2tarError::SinkError(
            "crate built without the metadata-sink feature".into(),
        ))
    }

    pub fn set_field(
        _config: &SinkConfig,
        _tag: &str,
        _field: SinkField,
        _value: &str,
    ) -> Result<(), Fw2tarError> {
        Err(Fw2tarError::SinkError(
            "crate built without the metadata-sink feature".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_field_columns_are_whitelisted() {
        assert_eq!(SinkField::KernelExtracted.column(), "kernel_extracted");
        assert_eq!(SinkField::RootfsExtracted.column(), "rootfs_extracted");
        assert_eq!(SinkField::KernelVersion.column(), "kernel_version");
    }

    #[cfg(not(feature = "metadata-sink"))]
    #[test]
    fn sink_fails_closed_without_feature() {
        let sink = MetadataSink::new(SinkConfig {
            host: "localhost".into(),
            port: 5432,
        });
        assert!(sink.generate_tag("fw.bin", "deadbeef", None).is_err());
    }
}
