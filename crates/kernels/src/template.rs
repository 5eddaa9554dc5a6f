//! Parametric kernel skeleton and placeholder substitution.
//!
//! Placeholders are written `{name}`; literal braces in the skeleton are
//! escaped as `{{` and `}}`. Substitution is a single left-to-right scan, so a
//! value containing braces is inserted verbatim and never re-scanned.

use crate::error::TemplateError;

/// Tiled shared-memory matmul skeleton. Placeholders: `real`, `fzero`, `TW`, `loop`.
pub const MATMUL_TEMPLATE: &str = include_str!("template.wgsl");

pub const PLACEHOLDERS: [&str; 4] = ["real", "fzero", "TW", "loop"];

pub fn render(template: &str, values: &[(&str, &str)]) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len() + 256);
    let bytes = template.as_bytes();
    let mut cursor = 0;
    let mut literal_start = 0;

    while cursor < bytes.len() {
        match bytes[cursor] {
            b'{' if bytes.get(cursor + 1) == Some(&b'{') => {
                out.push_str(&template[literal_start..cursor]);
                out.push('{');
                cursor += 2;
                literal_start = cursor;
            }
            b'{' => {
                out.push_str(&template[literal_start..cursor]);
                let close = template[cursor + 1..]
                    .find('}')
                    .map(|rel| cursor + 1 + rel)
                    .ok_or(TemplateError::Unterminated { offset: cursor })?;
                let name = &template[cursor + 1..close];
                if !is_identifier(name) {
                    return Err(TemplateError::Unterminated { offset: cursor });
                }
                let value = values
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| *value)
                    .ok_or_else(|| TemplateError::UnknownPlaceholder {
                        name: name.to_string(),
                        offset: cursor,
                    })?;
                out.push_str(value);
                cursor = close + 1;
                literal_start = cursor;
            }
            b'}' if bytes.get(cursor + 1) == Some(&b'}') => {
                out.push_str(&template[literal_start..cursor]);
                out.push('}');
                cursor += 2;
                literal_start = cursor;
            }
            b'}' => return Err(TemplateError::UnmatchedBrace { offset: cursor }),
            _ => cursor += 1,
        }
    }

    out.push_str(&template[literal_start..]);
    Ok(out)
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_and_unescapes() {
        let out = render("fn f() {{ return {x}; }}", &[("x", "1")]).unwrap();
        assert_eq!(out, "fn f() { return 1; }");
    }

    #[test]
    fn inserted_values_are_not_rescanned() {
        let out = render("{a}", &[("a", "{b}"), ("b", "nope")]).unwrap();
        assert_eq!(out, "{b}");
    }

    #[test]
    fn reports_unknown_placeholder() {
        let err = render("ab{TWX}", &[("TW", "8")]).unwrap_err();
        assert_eq!(
            err,
            TemplateError::UnknownPlaceholder {
                name: "TWX".into(),
                offset: 2
            }
        );
    }

    #[test]
    fn reports_stray_braces() {
        assert_eq!(
            render("x }", &[]).unwrap_err(),
            TemplateError::UnmatchedBrace { offset: 2 }
        );
        assert_eq!(
            render("x {real", &[("real", "f32")]).unwrap_err(),
            TemplateError::Unterminated { offset: 2 }
        );
        assert_eq!(
            render("{ real }", &[("real", "f32")]).unwrap_err(),
            TemplateError::Unterminated { offset: 0 }
        );
    }

    #[test]
    fn skeleton_uses_exactly_the_known_placeholders() {
        let values: Vec<(&str, &str)> = PLACEHOLDERS.iter().map(|p| (*p, "")).collect();
        render(MATMUL_TEMPLATE, &values).expect("skeleton renders");
        for placeholder in PLACEHOLDERS {
            assert!(
                MATMUL_TEMPLATE.contains(&format!("{{{placeholder}}}")),
                "missing {placeholder}"
            );
        }
    }
}
