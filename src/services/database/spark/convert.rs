// Arrow record batches to JSON rows
use datafusion::arrow::array::*;
use datafusion::arrow::datatypes::*;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::arrow::util::display::array_value_to_string;
use datafusion::error::DataFusionError;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ControllerError, Result};

pub(crate) fn batches_to_rows(batches: &[RecordBatch]) -> Result<Vec<Vec<Value>>> {
    let total = batches.iter().map(RecordBatch::num_rows).sum();
    let mut rows = Vec::with_capacity(total);

    for batch in batches {
        for row_idx in 0..batch.num_rows() {
            let row = batch
                .columns()
                .iter()
                .map(|column| cell_to_json(column, row_idx))
                .collect::<Result<Vec<_>>>()?;
            rows.push(row);
        }
    }
    Ok(rows)
}

fn primitive<T>(array: &ArrayRef, row_idx: usize) -> Result<Value>
where
    T: ArrowPrimitiveType,
    T::Native: Serialize,
{
    let array = array
        .as_any()
        .downcast_ref::<PrimitiveArray<T>>()
        .ok_or_else(|| ControllerError::Internal(format!("Failed to downcast {} array", T::DATA_TYPE)))?;
    Ok(serde_json::to_value(array.value(row_idx)).unwrap_or(Value::Null))
}

fn cell_to_json(array: &ArrayRef, row_idx: usize) -> Result<Value> {
    if array.is_null(row_idx) {
        return Ok(Value::Null);
    }

    match array.data_type() {
        DataType::Boolean => {
            let array = array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(|| ControllerError::Internal("Failed to downcast to BooleanArray".to_string()))?;
            Ok(Value::Bool(array.value(row_idx)))
        }
        DataType::Int8 => primitive::<Int8Type>(array, row_idx),
        DataType::Int16 => primitive::<Int16Type>(array, row_idx),
        DataType::Int32 => primitive::<Int32Type>(array, row_idx),
        DataType::Int64 => primitive::<Int64Type>(array, row_idx),
        DataType::UInt8 => primitive::<UInt8Type>(array, row_idx),
        DataType::UInt16 => primitive::<UInt16Type>(array, row_idx),
        DataType::UInt32 => primitive::<UInt32Type>(array, row_idx),
        DataType::UInt64 => primitive::<UInt64Type>(array, row_idx),
        DataType::Float32 => primitive::<Float32Type>(array, row_idx),
        DataType::Float64 => primitive::<Float64Type>(array, row_idx),
        DataType::Utf8 => {
            let array = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| ControllerError::Internal("Failed to downcast to StringArray".to_string()))?;
            Ok(Value::String(array.value(row_idx).to_string()))
        }
        // Dates, timestamps, decimals and nested types use the engine's display format
        _ => array_value_to_string(array, row_idx)
            .map(Value::String)
            .map_err(|e| ControllerError::DataFusion(DataFusionError::from(e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_batches_to_rows() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("day", DataType::Date32, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("a"), None])),
                Arc::new(Date32Array::from(vec![Some(0), Some(1)])),
            ],
        )
        .unwrap();

        let rows = batches_to_rows(&[batch]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![Value::from(1), Value::from("a"), Value::from("1970-01-01")]);
        assert_eq!(rows[1][1], Value::Null);
    }
}
