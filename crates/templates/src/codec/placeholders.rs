//! `{{name}}` placeholders in URL templates and request bodies.
//!
//! Values are percent-encoded for path and query positions and escaped for
//! the body encoding; nothing is ever spliced in raw except for `raw` bodies.

use std::collections::BTreeMap;

use serde_json::Value;
use url::Url;

use crate::errors::{TemplateError, TemplateErrorKind, TemplateResult};
use crate::model::{BodyEncoding, BodyTemplate, ParamSource, ParamType, Parameter};

pub type ParamValues = BTreeMap<String, Value>;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, PartialEq)]
enum Piece<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

fn invalid(msg: impl Into<String>) -> TemplateError {
    TemplateErrorKind::InvalidTemplate(msg.into()).into()
}

fn pieces(text: &str) -> TemplateResult<Vec<Piece<'_>>> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        if start > 0 {
            out.push(Piece::Literal(&rest[..start]));
        }
        let after = &rest[start + OPEN.len()..];
        let end = after
            .find(CLOSE)
            .ok_or_else(|| invalid("unterminated placeholder"))?;
        let name = after[..end].trim();
        if !is_valid_name(name) {
            return Err(invalid(format!("bad placeholder name '{name}'")));
        }
        out.push(Piece::Placeholder(name));
        rest = &after[end + CLOSE.len()..];
    }
    if !rest.is_empty() {
        out.push(Piece::Literal(rest));
    }
    Ok(out)
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Placeholder names in order of first appearance.
pub fn placeholder_names(text: &str) -> TemplateResult<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    for piece in pieces(text)? {
        if let Piece::Placeholder(name) = piece {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

struct UrlParts<'a> {
    /// `scheme://authority`
    origin: &'a str,
    path: &'a str,
    query: Option<&'a str>,
    fragment: Option<&'a str>,
}

fn split_url(template: &str) -> TemplateResult<UrlParts<'_>> {
    let scheme_end = template
        .find("://")
        .ok_or_else(|| invalid("url template must be absolute"))?;
    let authority_start = scheme_end + 3;
    let authority_end = template[authority_start..]
        .find(['/', '?', '#'])
        .map(|i| authority_start + i)
        .unwrap_or(template.len());
    let origin = &template[..authority_end];
    let rest = &template[authority_end..];

    let (rest, fragment) = match rest.split_once('#') {
        Some((before, frag)) => (before, Some(frag)),
        None => (rest, None),
    };
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };
    Ok(UrlParts {
        origin,
        path,
        query,
        fragment,
    })
}

/// Host of a URL template, or `None` when it is not a valid absolute URL or
/// the authority is templated.
pub fn template_host(template: &str) -> Option<String> {
    let parts = split_url(template).ok()?;
    if parts.origin.contains(OPEN) {
        return None;
    }
    crate::model::url_host(parts.origin)
}

/// Checks placeholder syntax, keeps placeholders out of scheme/host/port and
/// requires an http(s) URL once placeholders are filled.
pub fn check_url_template(template: &str) -> TemplateResult<()> {
    let parts = split_url(template)?;
    if parts.origin.contains(OPEN) || parts.origin.contains(CLOSE) {
        return Err(invalid("placeholders are not allowed in scheme, host or port"));
    }
    let sample = fill(template, |_| "x".to_string())?;
    let url = Url::parse(&sample).map_err(|err| invalid(format!("unparsable url: {err}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(invalid("url template has no host"));
    }
    Ok(())
}

/// Where each placeholder appears. The first position wins.
pub fn placeholder_sources(
    url_template: &str,
    body: Option<&BodyTemplate>,
) -> TemplateResult<BTreeMap<String, ParamSource>> {
    let parts = split_url(url_template)?;
    let mut sources = BTreeMap::new();
    for name in placeholder_names(parts.path)? {
        sources.entry(name).or_insert(ParamSource::Path);
    }
    if let Some(query) = parts.query {
        for name in placeholder_names(query)? {
            sources.entry(name).or_insert(ParamSource::Query);
        }
    }
    if let Some(fragment) = parts.fragment {
        for name in placeholder_names(fragment)? {
            sources.entry(name).or_insert(ParamSource::Path);
        }
    }
    if let Some(body) = body {
        for name in placeholder_names(&body.content)? {
            sources.entry(name).or_insert(ParamSource::Body);
        }
    }
    Ok(sources)
}

fn fill(text: &str, mut value_of: impl FnMut(&str) -> String) -> TemplateResult<String> {
    let mut out = String::with_capacity(text.len());
    for piece in pieces(text)? {
        match piece {
            Piece::Literal(lit) => out.push_str(lit),
            Piece::Placeholder(name) => out.push_str(&value_of(name)),
        }
    }
    Ok(out)
}

/// Type-checks supplied values against the declared parameters and renders
/// them as strings. Defaults fill gaps; missing optional parameters are left
/// out of the result.
pub fn resolve_values(
    params: &[Parameter],
    provided: &ParamValues,
) -> TemplateResult<BTreeMap<String, String>> {
    if let Some(unknown) = provided
        .keys()
        .find(|name| !params.iter().any(|p| &p.name == *name))
    {
        return Err(TemplateError::invalid_params(format!(
            "unknown parameter '{unknown}'"
        )));
    }

    let mut rendered = BTreeMap::new();
    for param in params {
        let value = provided
            .get(&param.name)
            .filter(|v| !v.is_null())
            .or(param.default.as_ref().filter(|v| !v.is_null()));
        match value {
            Some(value) => {
                rendered.insert(param.name.clone(), render_value(param, value)?);
            }
            None if param.required => {
                return Err(TemplateError::invalid_params(format!(
                    "missing required parameter '{}'",
                    param.name
                )));
            }
            None => {}
        }
    }
    Ok(rendered)
}

fn render_value(param: &Parameter, value: &Value) -> TemplateResult<String> {
    let mismatch = || {
        TemplateError::invalid_params(format!(
            "parameter '{}' expects {:?}",
            param.name, param.param_type
        ))
    };
    match (param.param_type, value) {
        (ParamType::String, Value::String(s)) => Ok(s.clone()),
        (ParamType::String, Value::Number(n)) => Ok(n.to_string()),
        (ParamType::String, Value::Bool(b)) => Ok(b.to_string()),
        (ParamType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        (ParamType::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(|n| n.to_string())
            .map_err(|_| mismatch()),
        (ParamType::Number, Value::Number(n)) => Ok(n.to_string()),
        (ParamType::Number, Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(s.trim().to_string()),
            _ => Err(mismatch()),
        },
        (ParamType::Boolean, Value::Bool(b)) => Ok(b.to_string()),
        (ParamType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok("true".into()),
            "false" => Ok("false".into()),
            _ => Err(mismatch()),
        },
        _ => Err(mismatch()),
    }
}

fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// `.` and `..` in any spelling URL parsers collapse, `%2e` included.
fn is_dot_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    decoded == "." || decoded == ".."
}

/// Builds the request URL. The result always keeps the template's host.
pub fn build_url(url_template: &str, rendered: &BTreeMap<String, String>) -> TemplateResult<String> {
    check_url_template(url_template)?;
    let parts = split_url(url_template)?;
    let lookup = |name: &str| rendered.get(name).map(|v| encode(v)).unwrap_or_default();

    let mut url = String::from(parts.origin);
    let mut segments = Vec::new();
    for segment in parts.path.split('/') {
        let filled = fill(segment, lookup)?;
        if segment.contains(OPEN) && is_dot_segment(&filled) {
            return Err(TemplateError::invalid_params(
                "path parameter would form a '.' or '..' segment",
            ));
        }
        segments.push(filled);
    }
    url.push_str(&segments.join("/"));

    if let Some(query) = parts.query {
        let mut pairs = Vec::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = match pair.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (pair, None),
            };
            if let Some(value) = value {
                if let [Piece::Placeholder(name)] = pieces(value)?.as_slice() {
                    if !rendered.contains_key(*name) {
                        continue;
                    }
                }
            }
            let mut built = fill(key, lookup)?;
            if let Some(value) = value {
                built.push('=');
                built.push_str(&fill(value, lookup)?);
            }
            pairs.push(built);
        }
        if !pairs.is_empty() {
            url.push('?');
            url.push_str(&pairs.join("&"));
        }
    }
    if let Some(fragment) = parts.fragment {
        url.push('#');
        url.push_str(&fill(fragment, lookup)?);
    }

    let parsed = Url::parse(&url)
        .map_err(|err| TemplateError::invalid_params(format!("built url is invalid: {err}")))?;
    let expected = template_host(url_template);
    let actual = parsed
        .host_str()
        .map(|h| h.trim_end_matches('.').to_ascii_lowercase());
    if expected.is_none() || expected != actual {
        return Err(TemplateError::invalid_params("built url changed host"));
    }
    Ok(url)
}

/// Renders a body template with escaping suited to its encoding.
pub fn build_body(body: &BodyTemplate, rendered: &BTreeMap<String, String>) -> TemplateResult<String> {
    fill(&body.content, |name| {
        let value = rendered.get(name).map(String::as_str).unwrap_or_default();
        match body.encoding {
            BodyEncoding::Json => json_escape(value),
            BodyEncoding::Form => encode(value),
            BodyEncoding::Raw => value.to_string(),
        }
    })
}

fn json_escape(value: &str) -> String {
    let quoted = Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn param(name: &str, ty: ParamType, required: bool, source: ParamSource) -> Parameter {
        Parameter {
            name: name.into(),
            param_type: ty,
            required,
            source,
            default: None,
            description: None,
        }
    }

    fn rendered(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn names_are_collected_once_in_order() {
        let names = placeholder_names("/a/{{ city }}/{{day}}?x={{city}}").unwrap();
        assert_eq!(names, vec!["city", "day"]);
        assert!(placeholder_names("/a/{{city").is_err());
        assert!(placeholder_names("/a/{{ }}").is_err());
    }

    #[test]
    fn authority_placeholders_are_rejected() {
        for bad in [
            "https://{{host}}/x",
            "https://api.example.com:{{port}}/x",
            "{{scheme}}://example.com/",
            "https://user{{x}}@example.com/",
        ] {
            assert!(check_url_template(bad).is_err(), "{bad}");
        }
        assert!(check_url_template("ftp://example.com/{{x}}").is_err());
        assert!(check_url_template("https://api.example.com/v1/{{id}}?q={{q}}").is_ok());
    }

    #[test]
    fn path_and_query_values_round_trip() {
        let template = "https://api.example.com/search/{{term}}?q={{q}}&page=2";
        let q = "a+b c&d=é%20";
        for term in ["red shoes/size 9 & ?#", "v1.2", "...", ".hidden"] {
            let url = build_url(template, &rendered(&[("term", term), ("q", q)])).unwrap();
            let parsed = Url::parse(&url).unwrap();
            assert_eq!(parsed.host_str(), Some("api.example.com"));
            let segment = parsed.path_segments().unwrap().last().unwrap();
            assert_eq!(urlencoding::decode(segment).unwrap(), term);
        }

        let url = build_url(template, &rendered(&[("term", "x"), ("q", q)])).unwrap();
        let parsed = Url::parse(&url).unwrap();
        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("q".to_string(), q.to_string()),
                ("page".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn dot_segment_values_cannot_climb_the_path() {
        let template = "https://api.example.com/v1/users/{{id}}/profile";
        for id in ["..", "."] {
            let err = build_url(template, &rendered(&[("id", id)])).unwrap_err();
            assert_eq!(err.category(), "invalid_parameters", "{id}");
        }
        let joined = "https://api.example.com/v1/{{a}}{{b}}/x";
        assert!(build_url(joined, &rendered(&[("a", "."), ("b", ".")])).is_err());
        assert!(build_url("https://api.example.com/v1/../{{id}}", &rendered(&[("id", "7")])).is_ok());
    }

    #[test]
    fn missing_optional_query_parameter_drops_its_pair() {
        let url = build_url(
            "https://api.example.com/list?q={{q}}&sort={{sort}}",
            &rendered(&[("q", "x")]),
        )
        .unwrap();
        assert_eq!(url, "https://api.example.com/list?q=x");
    }

    #[test]
    fn resolve_values_checks_types_and_requirements() {
        let params = vec![
            param("q", ParamType::String, true, ParamSource::Query),
            param("page", ParamType::Integer, false, ParamSource::Query),
            param("exact", ParamType::Boolean, false, ParamSource::Query),
        ];
        let mut values = ParamValues::new();
        values.insert("q".into(), json!("shoes"));
        values.insert("page".into(), json!("3"));
        values.insert("exact".into(), json!(true));
        let out = resolve_values(&params, &values).unwrap();
        assert_eq!(out.get("page").map(String::as_str), Some("3"));
        assert_eq!(out.get("exact").map(String::as_str), Some("true"));

        values.insert("page".into(), json!("three"));
        assert_eq!(
            resolve_values(&params, &values).unwrap_err().category(),
            "invalid_parameters"
        );

        let mut missing = ParamValues::new();
        missing.insert("page".into(), json!(1));
        assert!(resolve_values(&params, &missing).is_err());

        let mut unknown = ParamValues::new();
        unknown.insert("q".into(), json!("x"));
        unknown.insert("other".into(), json!("y"));
        assert!(resolve_values(&params, &unknown).is_err());
    }

    #[test]
    fn defaults_fill_missing_values() {
        let mut p = param("lang", ParamType::String, true, ParamSource::Query);
        p.default = Some(json!("en"));
        let out = resolve_values(&[p], &ParamValues::new()).unwrap();
        assert_eq!(out.get("lang").map(String::as_str), Some("en"));
    }

    #[test]
    fn bodies_are_escaped_per_encoding() {
        let values = rendered(&[("q", "say \"hi\"\n&more")]);
        let json_body = BodyTemplate {
            encoding: BodyEncoding::Json,
            content: r#"{"query":"{{q}}"}"#.into(),
        };
        let out = build_body(&json_body, &values).unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["query"], json!("say \"hi\"\n&more"));

        let form = BodyTemplate {
            encoding: BodyEncoding::Form,
            content: "q={{q}}&n=1".into(),
        };
        assert_eq!(
            build_body(&form, &values).unwrap(),
            "q=say%20%22hi%22%0A%26more&n=1"
        );
    }

    #[test]
    fn sources_follow_first_position() {
        let body = BodyTemplate {
            encoding: BodyEncoding::Json,
            content: r#"{"a":"{{id}}","b":"{{extra}}"}"#.into(),
        };
        let sources =
            placeholder_sources("https://x.test/items/{{id}}?q={{q}}", Some(&body)).unwrap();
        assert_eq!(sources.get("id"), Some(&ParamSource::Path));
        assert_eq!(sources.get("q"), Some(&ParamSource::Query));
        assert_eq!(sources.get("extra"), Some(&ParamSource::Body));
    }

    #[test]
    fn template_host_ignores_templated_authorities() {
        assert_eq!(
            template_host("https://API.Example.com/{{x}}").as_deref(),
            Some("api.example.com")
        );
        assert_eq!(template_host("https://{{h}}/x"), None);
    }
}
