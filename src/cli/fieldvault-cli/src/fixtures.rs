//! Demo patient collection.

use serde_json::{json, Value};

use fieldvault_schema::{BsonType, FieldRule};

/// Namespace of the demo collection.
pub const PATIENTS_NAMESPACE: &str = "medicalRecords.patients";

/// Encrypted fields of a patient record.
pub fn patient_rules() -> Vec<FieldRule> {
    vec![
        FieldRule::object(
            "insurance",
            vec![FieldRule::deterministic("policyNumber", BsonType::Int)],
        ),
        FieldRule::random("medicalRecords", BsonType::Array),
        FieldRule::random("bloodType", BsonType::String),
        FieldRule::deterministic("ssn", BsonType::Int),
    ]
}

/// A patient record matching [`patient_rules`].
pub fn sample_patient() -> Value {
    json!({
        "name": "Jon Doe",
        "ssn": 241014209,
        "bloodType": "AB+",
        "medicalRecords": [{ "weight": 180, "bloodPressure": "120/80" }],
        "insurance": {
            "provider": "MaestCare",
            "policyNumber": 123142
        }
    })
}
