//! Identifier case helpers for model names: `InvoiceLine` -> `invoice_line`, verbose names.

/// Convert a single identifier from CamelCase to snake_case.
/// e.g. "InvoiceLine" -> "invoice_line", "userId" -> "user_id"
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Human readable name from a model or field identifier.
/// e.g. "InvoiceLine" -> "invoice line", "due_date" -> "due date"
pub fn verbose_name(s: &str) -> String {
    to_snake_case(s).replace('_', " ")
}

/// Naive English plural used when no explicit plural is configured.
pub fn pluralize(s: &str) -> String {
    if s.ends_with('s') || s.ends_with('x') || s.ends_with("ch") || s.ends_with("sh") {
        format!("{}es", s)
    } else if s.ends_with('y') && !s.ends_with("ay") && !s.ends_with("ey") && !s.ends_with("oy") {
        format!("{}ies", &s[..s.len() - 1])
    } else {
        format!("{}s", s)
    }
}
