/// Arrow schema definitions for SCP reference data.
///
/// Money and quantity columns are `Utf8` so values survive the round trip
/// without going through binary floating point.
pub mod scp {
    use arrow::datatypes::{DataType, Field, Schema};

    /// Schema for price-book formula rows.
    pub fn reference_entry_schema() -> Schema {
        Schema::new(vec![
            Field::new("entry_id", DataType::Utf8, false),
            Field::new("code", DataType::Utf8, false),
            Field::new("year_from", DataType::Int32, false),
            Field::new("year_to", DataType::Int32, false),
            Field::new("effective_from", DataType::Utf8, false),
            Field::new("ref_a", DataType::Utf8, false),
            Field::new("ref_b", DataType::Utf8, false),
            Field::new("x_min", DataType::Utf8, true),
            Field::new("x_max", DataType::Utf8, true),
            Field::new("position_id", DataType::Utf8, true),
        ])
    }

    /// Schema for the coefficients each entry allows.
    pub fn coefficient_schema() -> Schema {
        Schema::new(vec![
            Field::new("entry_id", DataType::Utf8, false),
            Field::new("coefficient_id", DataType::Utf8, false),
            Field::new("value", DataType::Utf8, false),
            Field::new("conditions", DataType::Utf8, true),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::scp;

    #[test]
    fn reference_entry_schema_has_expected_fields() {
        let schema = scp::reference_entry_schema();
        assert_eq!(schema.fields().len(), 10);
        assert!(schema.field_with_name("ref_a").is_ok());
        assert!(schema.field_with_name("x_max").unwrap().is_nullable());
    }

    #[test]
    fn coefficient_schema_has_expected_fields() {
        let schema = scp::coefficient_schema();
        assert_eq!(schema.fields().len(), 4);
        assert!(!schema.field_with_name("value").unwrap().is_nullable());
    }
}
