//! Strategies that turn the verb-stripped part of a method name into a URL path.
//!
//! `GetUserInfo` is stripped to `UserInfo`, then re-cased by the selected
//! [`PathSchema`]. Word boundaries are case changes and separators:
//!
//! | strategy              | result      |
//! |-----------------------|-------------|
//! | `Original`            | `UserInfo`  |
//! | `LowerCase`           | `userinfo`  |
//! | `LowerCaseDash`       | `user-info` |
//! | `LowerCaseUnderscore` | `user_info` |
//! | `LowerCamelCase`      | `userInfo`  |
//! | `Backslash`           | `user/info` |

use heck::{ToKebabCase, ToLowerCamelCase, ToSnakeCase};
use serde::{Deserialize, Serialize};

/// Formats a method name fragment into a relative path
pub trait PathSchema: Send + Sync {
    fn name(&self) -> &'static str;

    fn format(&self, relative: &str) -> String;
}

pub struct Original;

impl PathSchema for Original {
    fn name(&self) -> &'static str {
        "original"
    }

    fn format(&self, relative: &str) -> String {
        relative.to_string()
    }
}

pub struct LowerCase;

impl PathSchema for LowerCase {
    fn name(&self) -> &'static str {
        "lowercase"
    }

    fn format(&self, relative: &str) -> String {
        relative.to_snake_case().replace('_', "")
    }
}

pub struct LowerCaseDash;

impl PathSchema for LowerCaseDash {
    fn name(&self) -> &'static str {
        "lowercase_dash"
    }

    fn format(&self, relative: &str) -> String {
        relative.to_kebab_case()
    }
}

pub struct LowerCaseUnderscore;

impl PathSchema for LowerCaseUnderscore {
    fn name(&self) -> &'static str {
        "lowercase_underscore"
    }

    fn format(&self, relative: &str) -> String {
        relative.to_snake_case()
    }
}

pub struct LowerCamelCase;

impl PathSchema for LowerCamelCase {
    fn name(&self) -> &'static str {
        "lower_camel_case"
    }

    fn format(&self, relative: &str) -> String {
        relative.to_lower_camel_case()
    }
}

/// Every word becomes a path segment
pub struct Backslash;

impl PathSchema for Backslash {
    fn name(&self) -> &'static str {
        "backslash"
    }

    fn format(&self, relative: &str) -> String {
        relative.to_snake_case().replace('_', "/")
    }
}

/// Applies several strategies in order, each one formatting the previous output.
pub struct Composed {
    schemas: Vec<Box<dyn PathSchema>>,
}

impl Composed {
    pub fn new(schemas: Vec<Box<dyn PathSchema>>) -> Self {
        Self { schemas }
    }
}

impl PathSchema for Composed {
    fn name(&self) -> &'static str {
        "composed"
    }

    fn format(&self, relative: &str) -> String {
        self.schemas
            .iter()
            .fold(relative.to_string(), |current, schema| schema.format(&current))
    }
}

/// Configurable selection of a built-in strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSchemaKind {
    Original,
    #[serde(rename = "lowercase")]
    LowerCase,
    #[default]
    #[serde(rename = "lowercase_dash")]
    LowerCaseDash,
    #[serde(rename = "lowercase_underscore")]
    LowerCaseUnderscore,
    LowerCamelCase,
    Backslash,
}

impl PathSchemaKind {
    pub fn schema(self) -> Box<dyn PathSchema> {
        match self {
            PathSchemaKind::Original => Box::new(Original),
            PathSchemaKind::LowerCase => Box::new(LowerCase),
            PathSchemaKind::LowerCaseDash => Box::new(LowerCaseDash),
            PathSchemaKind::LowerCaseUnderscore => Box::new(LowerCaseUnderscore),
            PathSchemaKind::LowerCamelCase => Box::new(LowerCamelCase),
            PathSchemaKind::Backslash => Box::new(Backslash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_boundaries() {
        assert_eq!(LowerCaseDash.format("HTTPServer"), "http-server");
        assert_eq!(LowerCaseDash.format("Page2Items"), "page2-items");
        assert_eq!(LowerCaseUnderscore.format("user-info"), "user_info");
        assert_eq!(Backslash.format(""), "");
    }

    #[test]
    fn test_builtin_strategies() {
        let cases: Vec<(Box<dyn PathSchema>, &str)> = vec![
            (Box::new(Original), "UserInfo"),
            (Box::new(LowerCase), "userinfo"),
            (Box::new(LowerCaseDash), "user-info"),
            (Box::new(LowerCaseUnderscore), "user_info"),
            (Box::new(LowerCamelCase), "userInfo"),
            (Box::new(Backslash), "user/info"),
        ];
        for (schema, expected) in cases {
            assert_eq!(schema.format("UserInfo"), expected, "schema {}", schema.name());
        }
    }

    #[test]
    fn test_composed() {
        let schema = Composed::new(vec![Box::new(LowerCaseDash), Box::new(Backslash)]);
        assert_eq!(schema.format("UserInfoDetail"), "user/info/detail");

        let schema = Composed::new(vec![Box::new(LowerCamelCase), Box::new(LowerCase)]);
        assert_eq!(schema.format("UserInfo"), "userinfo");
    }

    #[test]
    fn test_kind_default_and_serde() {
        assert_eq!(PathSchemaKind::default(), PathSchemaKind::LowerCaseDash);
        let kind: PathSchemaKind = serde_json::from_str("\"lower_camel_case\"").unwrap();
        assert_eq!(kind.schema().format("UserInfo"), "userInfo");
        let kind: PathSchemaKind = serde_json::from_str("\"lowercase_underscore\"").unwrap();
        assert_eq!(kind, PathSchemaKind::LowerCaseUnderscore);
    }
}
