use serde::Serialize;

use crate::ValueType;

/// Known state of one configuration property
///
/// `init_value` captures the first value ever observed and is never touched
/// again; `error_value` is only set when an initial load could not be applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyModel {
    id: String,
    #[serde(rename = "type")]
    raw_type: ValueType,
    description: String,
    value: String,
    init_value: Option<String>,
    error_value: Option<String>,
}

impl PropertyModel {
    pub fn new(
        id: impl Into<String>,
        raw_type: ValueType,
        description: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let mut model = Self::without_value(id, raw_type, description);
        model.set_value(value);
        model
    }

    /// Model for a key whose first observed value could not be applied.
    /// `init_value` stays unset until a value is accepted.
    pub fn without_value(
        id: impl Into<String>,
        raw_type: ValueType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            raw_type,
            description: description.into().trim().to_string(),
            value: String::new(),
            init_value: None,
            error_value: None,
        }
    }

    pub fn set_value(
        &mut self,
        value: impl Into<String>,
    ) {
        let value = value.into();
        if self.init_value.is_none() {
            self.init_value = Some(value.clone());
        }
        self.value = value;
    }

    pub fn set_error_value(
        &mut self,
        error_value: Option<String>,
    ) {
        self.error_value = error_value;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn raw_type(&self) -> ValueType {
        self.raw_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn init_value(&self) -> Option<&str> {
        self.init_value.as_deref()
    }

    pub fn error_value(&self) -> Option<&str> {
        self.error_value.as_deref()
    }
}
