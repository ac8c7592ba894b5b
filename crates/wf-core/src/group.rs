use std::fmt;

use wf_config::{DimensionSpec, GroupDimensions};

use crate::message::Point;

/// The identity of a group within a task: the measurement name plus the
/// ordered `(tag, value)` pairs that define it (spec.md §3 Group).
///
/// Two points are in the same group iff their `GroupKey`s are equal. Order
/// of the tag pairs is normalized (sorted by tag name) so equality does not
/// depend on tag-insertion order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    measurement: String,
    tags: Vec<(String, String)>,
}

impl GroupKey {
    pub fn from_point(point: &Point, dims: &GroupDimensions) -> Self {
        let measurement = if dims.by_measurement {
            point.measurement.clone()
        } else {
            String::new()
        };

        let tags: Vec<(String, String)> = match &dims.spec {
            DimensionSpec::Tags(names) => names
                .iter()
                .map(|name| {
                    let value = point.tags.get(name).cloned().unwrap_or_default();
                    (name.clone(), value)
                })
                .collect(),
            DimensionSpec::AllExcept(excluded) => point
                .tags
                .iter()
                .filter(|(k, _)| !excluded.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        Self { measurement, tags }
    }

    /// The key used by nodes that are not group-aware: all points collapse
    /// to a single implicit group.
    pub fn singleton() -> Self {
        Self {
            measurement: String::new(),
            tags: Vec::new(),
        }
    }

    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.measurement)?;
        for (k, v) in &self.tags {
            write!(f, ",{k}={v}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn tags_dimension_ignores_unrelated_tags() {
        let p = Point::new("cpu", Utc::now())
            .with_tag("host", "a")
            .with_tag("region", "us");
        let dims = GroupDimensions {
            by_measurement: true,
            spec: DimensionSpec::Tags(vec!["host".to_string()]),
        };
        let key = GroupKey::from_point(&p, &dims);
        assert_eq!(key.tags(), &[("host".to_string(), "a".to_string())]);
    }

    #[test]
    fn all_except_excludes_named_tags() {
        let p = Point::new("cpu", Utc::now())
            .with_tag("host", "a")
            .with_tag("secret", "x");
        let dims = GroupDimensions {
            by_measurement: false,
            spec: DimensionSpec::AllExcept(vec!["secret".to_string()]),
        };
        let key = GroupKey::from_point(&p, &dims);
        assert_eq!(key.tags(), &[("host".to_string(), "a".to_string())]);
    }

    #[test]
    fn equal_groups_compare_equal() {
        let a = GroupKey {
            measurement: "cpu".into(),
            tags: vec![("host".into(), "a".into())],
        };
        let b = a.clone();
        assert_eq!(a, b);
    }
}
