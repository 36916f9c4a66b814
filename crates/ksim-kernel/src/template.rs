use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("placeholder {{{index}}} has no variable ({available} supplied)")]
    MissingVariable { index: usize, available: usize },
    #[error("malformed placeholder at byte {0}")]
    Malformed(usize),
}

/// Substitute `{0}`, `{1}`, ... with the matching variable.
///
/// `{{` and `}}` produce literal braces. A template with no variables is
/// returned unchanged, so messages quoting braces (error text, paths) can be
/// reported without escaping.
pub fn render_template(template: &str, variables: &[Value]) -> Result<String, TemplateError> {
    if variables.is_empty() {
        return Ok(template.to_owned());
    }

    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((position, c)) = chars.next() {
        let doubled = chars.peek().is_some_and(|&(_, next)| next == c);
        match c {
            '{' | '}' if doubled => {
                chars.next();
                out.push(c);
            }
            '{' => {
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some((_, '}')) => break,
                        Some((_, digit)) if digit.is_ascii_digit() => digits.push(digit),
                        _ => return Err(TemplateError::Malformed(position)),
                    }
                }
                let index: usize = digits
                    .parse()
                    .map_err(|_| TemplateError::Malformed(position))?;
                let value = variables.get(index).ok_or(TemplateError::MissingVariable {
                    index,
                    available: variables.len(),
                })?;
                push_value(&mut out, value);
            }
            '}' => return Err(TemplateError::Malformed(position)),
            other => out.push(other),
        }
    }
    Ok(out)
}

fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::String(text) => out.push_str(text),
        Value::Null => {}
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn substitutes_positional_variables() {
        let rendered = render_template(
            "disk {0} failed after {1} retries ({0})",
            &[json!("sda"), json!(3)],
        );
        assert_eq!(rendered.as_deref(), Ok("disk sda failed after 3 retries (sda)"));
    }

    #[test]
    fn doubled_braces_are_literal() {
        let rendered = render_template("{{{0}}}", &[json!(true)]);
        assert_eq!(rendered.as_deref(), Ok("{true}"));
    }

    #[test]
    fn no_variables_means_no_substitution() {
        let rendered = render_template("kernel bug: unexpected {token}", &[]);
        assert_eq!(rendered.as_deref(), Ok("kernel bug: unexpected {token}"));
    }

    #[test]
    fn missing_variable_is_an_error() {
        let error = render_template("{2}", &[json!(1)]).unwrap_err();
        assert_eq!(
            error,
            TemplateError::MissingVariable {
                index: 2,
                available: 1
            }
        );
        assert_eq!(error.to_string(), "placeholder {2} has no variable (1 supplied)");
    }

    #[test]
    fn stray_braces_are_malformed() {
        assert_eq!(
            render_template("a {x} b", &[json!(1)]),
            Err(TemplateError::Malformed(2))
        );
        assert_eq!(
            render_template("a } b", &[json!(1)]),
            Err(TemplateError::Malformed(2))
        );
        assert_eq!(
            render_template("open {0", &[json!(1)]),
            Err(TemplateError::Malformed(5))
        );
    }
}
