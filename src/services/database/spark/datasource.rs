// PostgreSQL tables loaded into a session as in-memory tables
use datafusion::arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::common::TableReference;
use datafusion::datasource::MemTable;
use datafusion::prelude::SessionContext;
use std::sync::Arc;
use tokio_postgres::Row;

use crate::error::{ControllerError, Result};
use crate::models::{ConnectionConfig, DatabaseKind};
use crate::services::database::controller::DbController;
use crate::services::database::postgresql::PostgreSQLController;
use crate::validation::SqlValidator;

/// Arrow type a PostgreSQL column is read as, with the cast that produces it
fn column_type(pg_type: &str) -> (DataType, &'static str) {
    match pg_type {
        "smallint" | "integer" | "bigint" => (DataType::Int64, "int8"),
        "real" | "double precision" | "numeric" => (DataType::Float64, "float8"),
        "boolean" => (DataType::Boolean, "bool"),
        _ => (DataType::Utf8, "text"),
    }
}

/// Copy the configured tables into `ctx`, returning their names
pub(crate) async fn register_postgres_tables(ctx: &SessionContext, config: &ConnectionConfig) -> Result<Vec<String>> {
    let mut source = PostgreSQLController::new(config.for_kind(DatabaseKind::PostgreSql))?;
    let loaded = load_tables(&mut source, ctx, &config.spark.datasource_tables).await;
    source.close().await?;

    let tables = loaded?;
    tracing::info!(
        "Loaded {} table(s) from {}",
        tables.len(),
        source.config().masked_url()
    );
    Ok(tables)
}

async fn load_tables(source: &mut PostgreSQLController, ctx: &SessionContext, allow_list: &[String]) -> Result<Vec<String>> {
    let tables = if allow_list.is_empty() {
        source.get_all_table_names().await?
    } else {
        allow_list.to_vec()
    };

    for table in &tables {
        let batch = read_table(source, table).await?;
        let provider = MemTable::try_new(batch.schema(), vec![vec![batch]])?;
        ctx.register_table(TableReference::bare(table.as_str()), Arc::new(provider))?;
    }
    Ok(tables)
}

async fn read_table(source: &mut PostgreSQLController, table: &str) -> Result<RecordBatch> {
    let columns = source
        .query(
            "SELECT column_name::text, data_type::text FROM information_schema.columns \
             WHERE table_schema = 'public' AND table_name = $1 \
             ORDER BY ordinal_position",
            &[&table],
        )
        .await?;

    let mut fields = Vec::with_capacity(columns.len());
    let mut select_list = Vec::with_capacity(columns.len());
    for row in &columns {
        let name: String = row.try_get(0)?;
        let pg_type: String = row.try_get(1)?;
        let (data_type, cast) = column_type(&pg_type);
        select_list.push(format!("{}::{}", SqlValidator::quote_ident(&name), cast));
        fields.push(Field::new(name, data_type, true));
    }
    let schema: SchemaRef = Arc::new(Schema::new(fields));

    if select_list.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }

    let sql = format!(
        "SELECT {} FROM {}",
        select_list.join(", "),
        SqlValidator::quote_ident(table)
    );
    let rows = source.query(&sql, &[]).await?;
    rows_to_batch(&rows, schema)
}

fn rows_to_batch(rows: &[Row], schema: SchemaRef) -> Result<RecordBatch> {
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());

    for (col_idx, field) in schema.fields().iter().enumerate() {
        let array: ArrayRef = match field.data_type() {
            DataType::Int64 => {
                let mut builder = Int64Builder::with_capacity(rows.len());
                for row in rows {
                    builder.append_option(row.try_get::<_, Option<i64>>(col_idx)?);
                }
                Arc::new(builder.finish())
            }
            DataType::Float64 => {
                let mut builder = Float64Builder::with_capacity(rows.len());
                for row in rows {
                    builder.append_option(row.try_get::<_, Option<f64>>(col_idx)?);
                }
                Arc::new(builder.finish())
            }
            DataType::Boolean => {
                let mut builder = BooleanBuilder::with_capacity(rows.len());
                for row in rows {
                    builder.append_option(row.try_get::<_, Option<bool>>(col_idx)?);
                }
                Arc::new(builder.finish())
            }
            _ => {
                let mut builder = StringBuilder::new();
                for row in rows {
                    builder.append_option(row.try_get::<_, Option<String>>(col_idx)?);
                }
                Arc::new(builder.finish())
            }
        };
        arrays.push(array);
    }

    RecordBatch::try_new(schema, arrays).map_err(|e| ControllerError::DataFusion(e.into()))
}
