/*!
Évaluation simulée des templates de valeur côté front-end

Ne couvre que les deux formes émises par l'agent:
- `{{ value_json.chemin[0].champ }}`
- `{{ 'a' if value_json.chemin.get('clé', '') | regex_match('^Préfixe') else 'b' }}`

Un chemin absent ou nul donne `Value::Null`.
*/

use serde_json::Value;

/// Évalue `template` contre le payload d'état JSON
pub fn evaluate(template: &str, payload: &Value) -> Value {
    let Some(expr) = template
        .trim()
        .strip_prefix("{{")
        .and_then(|s| s.strip_suffix("}}"))
        .map(str::trim)
    else {
        // Texte littéral
        return Value::String(template.to_string());
    };

    if let Some(value) = evaluate_conditional(expr, payload) {
        return value;
    }

    expr.strip_prefix("value_json.")
        .and_then(|path| resolve(payload, path))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Résout `a.b[2].c` dans `root`
pub fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        let (name, indexes) = match segment.find('[') {
            Some(pos) => segment.split_at(pos),
            None => (segment, ""),
        };
        if !name.is_empty() {
            current = current.get(name)?;
        }
        for index in indexes.split('[').filter(|s| !s.is_empty()) {
            let index: usize = index.strip_suffix(']')?.parse().ok()?;
            current = current.get(index)?;
        }
    }
    Some(current)
}

fn evaluate_conditional(expr: &str, payload: &Value) -> Option<Value> {
    let (then_value, rest) = quoted(expr)?;
    let rest = rest.trim_start().strip_prefix("if ")?;
    let (condition, else_part) = rest.rsplit_once(" else ")?;
    let (else_value, _) = quoted(else_part.trim())?;

    let (lookup, filter) = condition.split_once(" | ")?;
    let pattern = filter
        .trim()
        .strip_prefix("regex_match(")?
        .strip_suffix(')')?;
    let (pattern, _) = quoted(pattern.trim())?;

    let (path, args) = lookup.trim().strip_prefix("value_json.")?.split_once(".get(")?;
    let (key, args) = quoted(args.trim())?;
    let (default, _) = quoted(args.trim_start().strip_prefix(',')?.trim())?;

    let text = resolve(payload, path)
        .and_then(|container| container.get(key))
        .and_then(Value::as_str)
        .unwrap_or(default);

    let matched = match pattern.strip_prefix('^') {
        Some(prefix) => text.starts_with(prefix),
        None => text.contains(pattern),
    };
    Some(Value::String(if matched { then_value } else { else_value }.to_string()))
}

/// Découpe un littéral `'...'` en tête de `s`
fn quoted(s: &str) -> Option<(&str, &str)> {
    let inner = s.strip_prefix('\'')?;
    let end = inner.find('\'')?;
    Some((&inner[..end], &inner[end + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_paths() {
        let payload = json!({ "load_avg": [0.1, 0.2, 0.3], "nested": { "list": [{ "x": 1 }] } });
        assert_eq!(evaluate("{{ value_json.load_avg[1] }}", &payload), json!(0.2));
        assert_eq!(resolve(&payload, "nested.list[0].x"), Some(&json!(1)));
        assert_eq!(evaluate("{{ value_json.missing }}", &payload), Value::Null);
        assert_eq!(evaluate("{{ value_json.load_avg[7] }}", &payload), Value::Null);
    }

    #[test]
    fn test_conditional() {
        let template = "{{ 'running' if value_json.docker.get('plex', '') | regex_match('^Up') else 'stopped' }}";
        assert_eq!(evaluate(template, &json!({ "docker": { "plex": "Up 1 hour" } })), json!("running"));
        assert_eq!(evaluate(template, &json!({ "docker": { "plex": "Created" } })), json!("stopped"));
        // Sensible à la casse
        assert_eq!(evaluate(template, &json!({ "docker": { "plex": "up 1 hour" } })), json!("stopped"));
        assert_eq!(evaluate(template, &json!({})), json!("stopped"));
    }

    #[test]
    fn test_literal() {
        assert_eq!(evaluate("static", &json!({})), json!("static"));
    }
}
