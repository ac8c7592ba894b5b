use std::collections::HashMap;
use std::sync::Arc;

use wf_config::SideloadField;

use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::message::{Message, Point};
use crate::node::NodeOutputs;

/// A side table Sideload consults to enrich points (spec.md §4.5 Sideload).
/// Production wiring renders `source_template` against a point's tags to
/// get a lookup path (e.g. a per-host JSON file); tests use an in-memory
/// map keyed by the rendered path.
pub trait SideloadSource: Send + Sync {
    fn lookup(&self, rendered_path: &str) -> Option<HashMap<String, String>>;
}

/// In-memory sideload table, keyed by the rendered template string.
#[derive(Default)]
pub struct MemorySideloadSource(pub HashMap<String, HashMap<String, String>>);

impl SideloadSource for MemorySideloadSource {
    fn lookup(&self, rendered_path: &str) -> Option<HashMap<String, String>> {
        self.0.get(rendered_path).cloned()
    }
}

/// Enriches points with fields pulled from an external key-value source,
/// with safe coercion and a default when the source has nothing for this
/// point (spec.md §4.5).
pub struct SideloadTransform {
    pub source_template: String,
    pub fields: Vec<SideloadField>,
    pub source: Arc<dyn SideloadSource>,
}

impl SideloadTransform {
    pub async fn run(self, mut input: EdgeReceiver, outputs: NodeOutputs) -> CoreResult<()> {
        while let Some(msg) = input.recv().await {
            let msg = match msg {
                Message::Point(group, point) => {
                    let point = self.apply(point);
                    Message::Point(group, point)
                }
                other => other,
            };
            outputs.fan_out(msg).await?;
        }
        Ok(())
    }

    fn apply(&self, mut point: Point) -> Point {
        let path = render_template(&self.source_template, &point);
        let row = self.source.lookup(&path);

        for field in &self.fields {
            let raw = row.as_ref().and_then(|r| r.get(&field.name));
            let value = raw
                .and_then(|s| {
                    wf_config::FieldValue::Str(s.clone()).coerce_to(field.coerce)
                })
                .unwrap_or_else(|| field.default.clone());
            point.fields.insert(field.name.clone(), value);
        }
        point
    }
}

fn render_template(template: &str, point: &Point) -> String {
    let mut out = template.to_string();
    for (tag, value) in &point.tags {
        out = out.replace(&format!("{{{{.{tag}}}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_config::FieldKind;

    #[test]
    fn looked_up_value_coerced_to_float() {
        let mut table = HashMap::new();
        table.insert(
            "host-a".to_string(),
            HashMap::from([("rack".to_string(), "12".to_string())]),
        );
        let source = Arc::new(MemorySideloadSource(table));

        let sideload = SideloadTransform {
            source_template: "host-{{.host}}".to_string(),
            fields: vec![SideloadField {
                name: "rack".to_string(),
                default: wf_config::FieldValue::Float(-1.0),
                coerce: FieldKind::Float,
            }],
            source,
        };

        let point = Point::new("cpu", chrono::Utc::now()).with_tag("host", "a");
        let out = sideload.apply(point);
        assert_eq!(out.fields.get("rack"), Some(&wf_config::FieldValue::Float(12.0)));
    }

    #[test]
    fn missing_lookup_uses_default() {
        let source = Arc::new(MemorySideloadSource::default());
        let sideload = SideloadTransform {
            source_template: "host-{{.host}}".to_string(),
            fields: vec![SideloadField {
                name: "rack".to_string(),
                default: wf_config::FieldValue::Float(-1.0),
                coerce: FieldKind::Float,
            }],
            source,
        };
        let point = Point::new("cpu", chrono::Utc::now()).with_tag("host", "z");
        let out = sideload.apply(point);
        assert_eq!(out.fields.get("rack"), Some(&wf_config::FieldValue::Float(-1.0)));
    }
}
