use std::collections::HashMap;

/// Resolves the positional variable map the gateway expects for one contact.
///
/// Keys of the result are `"1"`, `"2"`, … matching the 1-based position of
/// each name in `names`. Per variable, first match wins:
///
/// 1. `mappings[name]` names a CSV column; take the contact's value for it.
/// 2. A non-empty `defaults[name]` literal.
/// 3. The contact column named exactly like the variable.
/// 4. The empty string, since the gateway requires a string for every position.
///
/// Duplicate variable names are resolved independently per position.
pub fn resolve_variables(
    names: &[String],
    contact: &HashMap<String, String>,
    mappings: &HashMap<String, String>,
    defaults: &HashMap<String, String>,
) -> HashMap<String, String> {
    names
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let value = resolve_one(name, contact, mappings, defaults);
            ((idx + 1).to_string(), value)
        })
        .collect()
}

fn resolve_one(
    name: &str,
    contact: &HashMap<String, String>,
    mappings: &HashMap<String, String>,
    defaults: &HashMap<String, String>,
) -> String {
    if let Some(column) = mappings.get(name).filter(|c| !c.is_empty()) {
        return contact.get(column).cloned().unwrap_or_default();
    }
    if let Some(default) = defaults.get(name) {
        if !default.is_empty() {
            return default.clone();
        }
    }
    contact.get(name).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn mapping_beats_default_beats_direct() {
        let resolved = resolve_variables(
            &names(&["empresa"]),
            &map(&[("empresa", "CSV_VAL")]),
            &map(&[("empresa", "empresa")]),
            &map(&[("empresa", "DEFAULT_VAL")]),
        );
        assert_eq!(resolved["1"], "CSV_VAL");
    }

    #[test]
    fn falls_through_the_chain() {
        let resolved = resolve_variables(
            &names(&["nombre", "empresa"]),
            &map(&[("nombre", "Ana")]),
            &HashMap::new(),
            &map(&[("empresa", "ACME")]),
        );
        assert_eq!(resolved["1"], "Ana");
        assert_eq!(resolved["2"], "ACME");
    }

    #[test]
    fn missing_everywhere_yields_empty_string() {
        let resolved = resolve_variables(
            &names(&["hora"]),
            &HashMap::new(),
            &HashMap::new(),
            &HashMap::new(),
        );
        assert_eq!(resolved["1"], "");
    }

    #[test]
    fn mapped_column_absent_from_contact_yields_empty_string() {
        // An explicit mapping wins the priority race even when the mapped
        // column is missing; it does not fall back to the default.
        let resolved = resolve_variables(
            &names(&["empresa"]),
            &HashMap::new(),
            &map(&[("empresa", "columna_x")]),
            &map(&[("empresa", "DEFAULT_VAL")]),
        );
        assert_eq!(resolved["1"], "");
    }

    #[test]
    fn empty_default_falls_through_to_direct_column() {
        let resolved = resolve_variables(
            &names(&["empresa"]),
            &map(&[("empresa", "Directa")]),
            &HashMap::new(),
            &map(&[("empresa", "")]),
        );
        assert_eq!(resolved["1"], "Directa");
    }

    #[test]
    fn duplicate_names_resolve_per_position() {
        let resolved = resolve_variables(
            &names(&["nombre", "nombre"]),
            &map(&[("nombre", "Ana")]),
            &HashMap::new(),
            &HashMap::new(),
        );
        assert_eq!(resolved["1"], "Ana");
        assert_eq!(resolved["2"], "Ana");
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn deterministic_across_calls() {
        let contact = map(&[("nombre", "Ana"), ("empresa", "ACME")]);
        let mappings = map(&[("empresa", "empresa")]);
        let defaults = map(&[("nombre", "Cliente")]);
        let vars = names(&["nombre", "empresa"]);

        let first = resolve_variables(&vars, &contact, &mappings, &defaults);
        for _ in 0..10 {
            assert_eq!(resolve_variables(&vars, &contact, &mappings, &defaults), first);
        }
    }
}
