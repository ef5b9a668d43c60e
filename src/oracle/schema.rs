//! The strict response schema attached to every oracle request.
//!
//! Derived from the `SimulationOutcome` types so the wire contract can never
//! drift from what the validator parses.

use schemars::schema_for;

use crate::domain::outcome::SimulationOutcome;

use super::types::{JsonSchemaSpec, ResponseFormat};

pub const RESPONSE_SCHEMA_NAME: &str = "simulation_outcome";

pub fn simulation_response_format() -> ResponseFormat {
    let schema = schema_for!(SimulationOutcome);
    let schema = serde_json::to_value(&schema)
        .unwrap_or_else(|_| serde_json::json!({ "type": "object" }));
    ResponseFormat {
        format_type: "json_schema".to_string(),
        json_schema: JsonSchemaSpec {
            name: RESPONSE_SCHEMA_NAME.to_string(),
            schema,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_lists_every_top_level_field() {
        let format = simulation_response_format();
        assert_eq!(format.format_type, "json_schema");
        assert_eq!(format.json_schema.name, RESPONSE_SCHEMA_NAME);

        let properties = &format.json_schema.schema["properties"];
        for field in [
            "sales",
            "revenue",
            "costs",
            "waste",
            "cashBefore",
            "cashAfter",
            "inventoryState",
            "netProfit",
            "randomEvent",
            "summary",
            "education",
        ] {
            assert!(
                properties.get(field).is_some(),
                "schema is missing top-level field {field}"
            );
        }
    }

    #[test]
    fn test_schema_forbids_unknown_fields() {
        let format = simulation_response_format();
        assert_eq!(
            format.json_schema.schema["additionalProperties"],
            serde_json::json!(false)
        );
    }
}
