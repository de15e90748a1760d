//! Concrete enrichment stages.
//!
//! Each stage mirrors one external correction service: its required input
//! fields, the request fragment it sends, and the slice of the response it
//! keeps on the record.

use serde_json::{json, Map, Value};

use super::{MergeRule, StageSpec, SuccessRule};
use crate::record::CanonicalRecord;

/// Person-name parsing. Config keys `nameType`, `nameOrder`, `delimiter`
/// are merged into every fragment with the service defaults.
pub const NAMEPARSE: StageSpec = StageSpec {
    name: "nameparse",
    status_label: "NAMEPARSE",
    required_fields: &["name"],
    wants_system_id: true,
    build_request: nameparse_request,
    success_rule: SuccessRule::OutputPresent,
    merge: MergeRule {
        copy_keys: &["name", "nameType", "nameOrder", "delimiter", "output", "appendage"],
        forced_status: Some("SUCCESS"),
    },
};

/// Email deliverability check. The service reports a lowercase per-entry
/// `status` token rather than an `output` block.
pub const EMAIL_HYGIENE: StageSpec = StageSpec {
    name: "email_hygiene",
    status_label: "EMAIL_HYGIENE",
    required_fields: &["email"],
    wants_system_id: false,
    build_request: email_hygiene_request,
    success_rule: SuccessRule::StatusEquals("success"),
    merge: MergeRule {
        copy_keys: &["status", "input", "details"],
        forced_status: None,
    },
};

/// US postal address standardization and validation.
pub const US_ADDRESS_LOOKUP: StageSpec = StageSpec {
    name: "us_address_lookup",
    status_label: "US_ADDRESS_LOOKUP",
    required_fields: &["name", "firm", "address1", "address2", "lastline"],
    wants_system_id: true,
    build_request: us_address_lookup_request,
    success_rule: SuccessRule::OutputPresent,
    merge: MergeRule {
        copy_keys: &["output"],
        forced_status: Some("SUCCESS"),
    },
};

/// Combined do-not-contact suppression across name/address, email, phone,
/// and FTC lists.
pub const COMBINED_SUPPRESSION: StageSpec = StageSpec {
    name: "combined_suppression",
    status_label: "COMBINED_SUPPRESSION",
    required_fields: &["name", "address1", "city", "state", "postal", "email", "phone"],
    wants_system_id: true,
    build_request: combined_suppression_request,
    success_rule: SuccessRule::OutputPresent,
    merge: MergeRule {
        copy_keys: &["output"],
        forced_status: Some("SUCCESS"),
    },
};

pub const ALL: &[&StageSpec] = &[
    &NAMEPARSE,
    &EMAIL_HYGIENE,
    &US_ADDRESS_LOOKUP,
    &COMBINED_SUPPRESSION,
];

/// Look up a stage by its wire name.
pub fn stage_by_name(name: &str) -> Option<&'static StageSpec> {
    ALL.iter().copied().find(|stage| stage.name == name)
}

fn input_value(record: &CanonicalRecord, key: &str) -> String {
    // Pre-validation guarantees required keys exist; stay panic-free anyway.
    record.input.get(key).cloned().unwrap_or_default()
}

fn config_str(config: &Value, key: &str, default: &str) -> Value {
    Value::String(
        config
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string(),
    )
}

fn nameparse_request(record: &CanonicalRecord, config: &Value) -> Value {
    let mut fragment = Map::new();
    fragment.insert("name".to_string(), Value::String(input_value(record, "name")));
    fragment.insert("nameType".to_string(), config_str(config, "nameType", "M"));
    fragment.insert(
        "nameOrder".to_string(),
        config_str(config, "nameOrder", "first-name-first"),
    );
    fragment.insert("delimiter".to_string(), config_str(config, "delimiter", ","));
    Value::Object(fragment)
}

fn email_hygiene_request(record: &CanonicalRecord, _config: &Value) -> Value {
    json!({ "email": input_value(record, "email") })
}

fn us_address_lookup_request(record: &CanonicalRecord, _config: &Value) -> Value {
    json!({
        "name": input_value(record, "name"),
        "firm": input_value(record, "firm"),
        "address1": input_value(record, "address1"),
        "address2": input_value(record, "address2"),
        "lastline": input_value(record, "lastline"),
    })
}

const SUPPRESSION_FLAGS: &[&str] = &[
    "pandALL",
    "MPSIndicator",
    "DTSIndicator",
    "OfficialIndicator",
    "BUSIndicator",
    "DMIIndicator",
    "RETIndicator",
    "EXTIndicator",
    "COLIndicator",
    "MILIndicator",
    "TRLIndicator",
    "NURIndicator",
    "CLIIndicator",
    "DBAIndicator",
    "ACAIndicator",
    "Reserved",
    "DECIndicator",
    "RELIndicator",
];

const SUPPRESSION_TOGGLES: &[&str] = &[
    "performNameAddress",
    "performEmail",
    "blankEmails",
    "performPhone",
    "performFTC",
    "blankFTCPhones",
    "performAtty",
    "performTPS",
    "performBusinessPhone",
];

const DEFAULT_SAN_ID: &str = "10422243-522243-25";

fn combined_suppression_request(record: &CanonicalRecord, config: &Value) -> Value {
    let name = input_value(record, "name");
    let mut parts = name.split(' ');
    let first_name = parts.next().unwrap_or("").to_string();
    let last_name = parts.next().unwrap_or("").to_string();

    let params = config.get("parameters").cloned().unwrap_or(Value::Null);
    let mut flags = Map::new();
    for flag in SUPPRESSION_FLAGS {
        let enabled = params
            .get("suppressionFlags")
            .and_then(|section| section.get(*flag))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        flags.insert((*flag).to_string(), Value::Bool(enabled));
    }
    let mut parameters = Map::new();
    parameters.insert("suppressionFlags".to_string(), Value::Object(flags));
    for toggle in SUPPRESSION_TOGGLES {
        let enabled = params
            .get(*toggle)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        parameters.insert((*toggle).to_string(), Value::Bool(enabled));
    }

    json!({
        "input": {
            "standardkeys": {
                "keys": {
                    "linkage": {
                        "dataset": "USERDEF",
                        "partition": 0,
                        "recordid": 1_452_172,
                    },
                    "names": [{
                        "firstName": first_name,
                        "lastName": last_name,
                    }],
                    "address": [{
                        "addressLine": ["", input_value(record, "address1")],
                        "city": input_value(record, "city"),
                        "state": input_value(record, "state"),
                        "zipCode": input_value(record, "postal"),
                        "zipFour": "",
                    }],
                    "orientation": config_str(config, "orientation", "FNF"),
                    "nameType": config_str(config, "nameType", "M"),
                },
                "unparsed": {},
            },
            "ftcinput": {
                "sanid": config_str(config, "san_id", DEFAULT_SAN_ID),
            },
            "email": input_value(record, "email"),
            "telephone": input_value(record, "phone"),
        },
        "parameters": parameters,
    })
}
