//! CREATE TABLE generation from the field model.

use crate::entity::Entity;
use crate::stmt::quote_ident;
use rowmap_core::{Error, FieldKind, Result, SchemaErrorKind};

/// Generate the `CREATE TABLE IF NOT EXISTS` statement for an entity.
///
/// ENTITY fields adopt the SQL type of the referenced primary key, so the
/// referenced entity must already be registered. Virtual fields are not
/// persisted and are omitted. When the primary key is the implicit rowid the
/// PRIMARY KEY clause is omitted.
pub(crate) fn create_sql(entity: &Entity) -> Result<String> {
    let session = entity.session()?;
    let mut lines = Vec::new();
    let mut fkeys = Vec::new();

    for field in entity.persisted() {
        let sql_type = match field.kind {
            FieldKind::Entity => {
                let target_name = field.target.as_deref().unwrap_or_default();
                let target = session.entity(target_name).ok_or_else(|| {
                    Error::schema(
                        SchemaErrorKind::UnknownEntity,
                        format!(
                            "{}.{} references unregistered entity '{}'",
                            entity.name(),
                            field.name,
                            target_name
                        ),
                    )
                })?;
                fkeys.push(format!(
                    "FOREIGN KEY({}) REFERENCES {}({}) ON UPDATE CASCADE ON DELETE CASCADE",
                    quote_ident(&field.name),
                    quote_ident(target.name()),
                    quote_ident(target.key()),
                ));
                target.key_sql_type()
            }
            kind => kind.sql_type(),
        };

        let mut line = format!("{} {}", quote_ident(&field.name), sql_type);
        if field.required {
            line.push_str(" NOT NULL");
        }
        if field.unique {
            line.push_str(" UNIQUE");
        }
        lines.push(line);
    }

    lines.extend(fkeys);
    if entity.key() != "rowid" {
        lines.push(format!("PRIMARY KEY({})", quote_ident(entity.key())));
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(entity.name()),
        lines.join(", ")
    ))
}
