//! Row decoding from PostgreSQL into weave values.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use sqlx::{
    decode::Decode,
    postgres::{PgRow, PgValueRef, Postgres},
    types::Json,
    Column, Row as _, TypeInfo, Value as _, ValueRef,
};
use uuid::Uuid;
use weave_core::{Row, Value};

/// Decode one column value, picking the Rust type from the column's
/// PostgreSQL type name.
pub fn decode_value(vr: PgValueRef<'_>) -> Result<Value> {
    if vr.is_null() {
        return Ok(Value::Null);
    }

    let owned = ValueRef::to_owned(&vr);
    let tn = owned.as_ref().type_info().name().to_string();

    macro_rules! dec {
        ($t:ty) => {{
            <$t as Decode<'_, Postgres>>::decode(owned.as_ref()).map_err(|e| {
                anyhow!(
                    "decode {} as {} failed: {}",
                    tn,
                    std::any::type_name::<$t>(),
                    e
                )
            })
        }};
    }

    match tn.as_str() {
        "INT8" => Ok(Value::Int(dec!(i64)?)),
        "INT4" | "OID" => Ok(Value::Int(i64::from(dec!(i32)?))),
        "INT2" => Ok(Value::Int(i64::from(dec!(i16)?))),
        "FLOAT8" => Ok(Value::Float(dec!(f64)?)),
        "FLOAT4" => Ok(Value::Float(f64::from(dec!(f32)?))),
        "BOOL" => Ok(Value::Bool(dec!(bool)?)),

        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" => Ok(Value::Text(dec!(String)?)),
        "UUID" => Ok(Value::Text(dec!(Uuid)?.to_string())),
        "JSON" | "JSONB" => Ok(Value::Json(dec!(Json<serde_json::Value>)?.0)),

        "TIMESTAMPTZ" => Ok(Value::Text(
            dec!(DateTime<Utc>)?.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        )),
        "TIMESTAMP" => Ok(Value::Text(
            dec!(NaiveDateTime)?
                .and_utc()
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        )),
        "DATE" => Ok(Value::Text(dec!(NaiveDate)?.to_string())),
        "TIME" => Ok(Value::Text(dec!(NaiveTime)?.to_string())),

        // bytes as PostgreSQL hex text
        "BYTEA" => {
            let raw: Vec<u8> = dec!(Vec<u8>)?;
            let hex: String = raw.iter().map(|b| format!("{b:02x}")).collect();
            Ok(Value::Text(format!("\\x{hex}")))
        }

        "NUMERIC" => bail!(
            "cannot decode NUMERIC without a decimal type; cast the column to FLOAT8 or TEXT"
        ),
        other => bail!("Unsupported PostgreSQL type: {other}"),
    }
}

/// Decode every column of `row`, keyed by column name.
pub fn decode_row(row: &PgRow) -> Result<Row> {
    let mut out = Row::new();
    for col in row.columns() {
        let name = col.name();
        let value = row
            .try_get_raw(col.ordinal())
            .map_err(|e| anyhow!("error accessing column {name}: {e}"))
            .and_then(decode_value)
            .with_context(|| format!("column {name}"))?;
        out.insert(name.to_string(), value);
    }
    Ok(out)
}
