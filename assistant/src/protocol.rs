//! Conversation and tool protocol types shared by the loop, the model
//! clients and the HTTP surface.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    FunctionCall {
        name: String,
        #[serde(default)]
        args: Map<String, Value>,
    },
    FunctionResponse {
        name: String,
        response: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::Text { text: text.into() }])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::Text { text: text.into() }])
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::Text { text: text.into() }])
    }

    pub fn model_call(name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self::new(
            Role::Model,
            vec![Part::FunctionCall {
                name: name.into(),
                args,
            }],
        )
    }

    /// The user-role turn that carries a tool result back to the model.
    pub fn function_response(name: impl Into<String>, outcome: &ToolOutcome) -> Self {
        Self::new(
            Role::User,
            vec![Part::FunctionResponse {
                name: name.into(),
                response: outcome.to_response_value(),
            }],
        )
    }

    pub fn function_calls(&self) -> impl Iterator<Item = (&str, &Map<String, Value>)> + '_ {
        self.parts.iter().filter_map(|part| match part {
            Part::FunctionCall { name, args } => Some((name.as_str(), args)),
            _ => None,
        })
    }

    pub fn first_function_call(&self) -> Option<(&str, &Map<String, Value>)> {
        self.function_calls().next()
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// A tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON Schema object for the arguments
    pub parameters: Value,
}

impl ToolDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    pub fn with_string_param(mut self, name: &str, description: &str, required: bool) -> Self {
        if let Some(props) = self.parameters["properties"].as_object_mut() {
            props.insert(
                name.to_string(),
                json!({"type": "string", "description": description}),
            );
        }
        if required {
            if let Some(params) = self.parameters.as_object_mut() {
                let required = params
                    .entry("required")
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Some(list) = required.as_array_mut() {
                    list.push(Value::String(name.to_string()));
                }
            }
        }
        self
    }
}

/// One tool invocation as seen by the retry accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    /// 1 for the first call with these exact arguments
    pub attempt_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub success: bool,
    pub text: String,
}

impl ToolOutcome {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
        }
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            success: false,
            text: text.into(),
        }
    }

    pub fn to_response_value(&self) -> Value {
        json!({"result": self.text, "success": self.success})
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(alias = "user_id")]
    pub tenant_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}
