use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How contributions are folded into a reputation value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Sum,
    Average,
    Product,
    /// Name of an aggregator registered with the network.
    Custom(String),
}

impl Aggregation {
    /// Value of a node that has received no contributions.
    pub fn identity(&self) -> f64 {
        match self {
            Aggregation::Product => 1.0,
            _ => 0.0,
        }
    }

    pub fn is_product(&self) -> bool {
        matches!(self, Aggregation::Product)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Average => "average",
            Aggregation::Product => "product",
            Aggregation::Custom(name) => name,
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "sum" => Aggregation::Sum,
            "average" => Aggregation::Average,
            "product" => Aggregation::Product,
            other => Aggregation::Custom(other.to_string()),
        })
    }
}

impl From<&str> for Aggregation {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(aggregation) => aggregation,
            Err(never) => match never {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_one_only_for_product() {
        assert_eq!(Aggregation::Sum.identity(), 0.0);
        assert_eq!(Aggregation::Average.identity(), 0.0);
        assert_eq!(Aggregation::Product.identity(), 1.0);
        assert_eq!(Aggregation::Custom("weighted".into()).identity(), 0.0);
    }

    #[test]
    fn parses_builtin_and_custom_names() {
        assert_eq!(Aggregation::from("sum"), Aggregation::Sum);
        assert_eq!(Aggregation::from("product"), Aggregation::Product);
        assert_eq!(
            Aggregation::from("custom_aggregation"),
            Aggregation::Custom("custom_aggregation".into())
        );
        assert_eq!(Aggregation::Average.to_string(), "average");
    }

    #[test]
    fn serializes_as_lowercase_names() {
        assert_eq!(serde_json::to_string(&Aggregation::Product).unwrap(), "\"product\"");
        let custom: Aggregation = serde_json::from_str(r#"{"custom":"weighted"}"#).unwrap();
        assert_eq!(custom, Aggregation::Custom("weighted".into()));
    }
}
