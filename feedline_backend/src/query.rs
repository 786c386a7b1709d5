//! Statement templates with optional clauses.
//!
//! Read paths describe their SQL once, with `{{if .name}} … {{end}}` blocks for
//! the parts that depend on the caller (authenticated viewer, cursor, limit)
//! and `@name` placeholders for values. [`build_query`] resolves the blocks
//! against a set of named values and rewrites every placeholder occurrence
//! into a positional `?N` marker, returning the values in marker order.
//!
//! Parsed templates are cached for the life of the process, keyed by the raw
//! template text.

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unterminated action starting at byte {0}")]
    Unterminated(usize),
    #[error("unknown template action `{0}`")]
    UnknownAction(String),
    #[error("malformed condition `{0}`")]
    MalformedCondition(String),
    #[error("`{{{{{0}}}}}` without a matching `{{{{if}}}}`")]
    Unbalanced(&'static str),
    #[error("`{{{{if}}}}` block is never closed")]
    Unclosed,
    #[error("placeholder @{0} has no value")]
    MissingValue(String),
}

/// A value bound to a template name.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl QueryValue {
    /// Non-zero numbers, non-empty strings and `true` gate blocks in.
    pub fn is_truthy(&self) -> bool {
        match self {
            QueryValue::Null => false,
            QueryValue::Bool(value) => *value,
            QueryValue::Int(value) => *value != 0,
            QueryValue::Text(value) => !value.is_empty(),
        }
    }
}

impl ToSql for QueryValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            QueryValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            QueryValue::Bool(value) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*value))),
            QueryValue::Int(value) => ToSqlOutput::Borrowed(ValueRef::Integer(*value)),
            QueryValue::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
        })
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        QueryValue::Bool(value)
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        QueryValue::Int(value)
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Text(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::Text(value)
    }
}

impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(QueryValue::Null)
    }
}

/// Named values handed to [`build_query`].
#[derive(Debug, Clone, Default)]
pub struct QueryArgs {
    values: BTreeMap<String, QueryValue>,
}

impl QueryArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<QueryValue>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&QueryValue> {
        self.values.get(name)
    }

    fn is_truthy(&self, name: &str) -> bool {
        self.values.get(name).map(QueryValue::is_truthy).unwrap_or(false)
    }
}

/// A resolved statement ready for `Connection::prepare`.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<QueryValue>,
}

pub fn build_query(template: &str, args: &QueryArgs) -> Result<BuiltQuery, TemplateError> {
    let compiled = compiled_template(template)?;
    let mut resolved = String::with_capacity(template.len());
    render_nodes(&compiled.nodes, args, &mut resolved);
    bind_placeholders(&resolved, args)
}

#[derive(Debug)]
struct Template {
    nodes: Vec<Node>,
}

#[derive(Debug)]
enum Node {
    Text(String),
    If {
        condition: Condition,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

#[derive(Debug)]
enum Condition {
    Field(String),
    Not(String),
    And(Vec<String>),
    Or(Vec<String>),
}

impl Condition {
    fn evaluate(&self, args: &QueryArgs) -> bool {
        match self {
            Condition::Field(name) => args.is_truthy(name),
            Condition::Not(name) => !args.is_truthy(name),
            Condition::And(names) => names.iter().all(|name| args.is_truthy(name)),
            Condition::Or(names) => names.iter().any(|name| args.is_truthy(name)),
        }
    }
}

fn template_cache() -> &'static RwLock<HashMap<String, Arc<Template>>> {
    static CACHE: OnceLock<RwLock<HashMap<String, Arc<Template>>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

fn compiled_template(template: &str) -> Result<Arc<Template>, TemplateError> {
    let cache = template_cache();
    if let Some(found) = cache
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(template)
    {
        return Ok(found.clone());
    }

    let parsed = Arc::new(parse_template(template)?);
    let mut guard = cache.write().unwrap_or_else(PoisonError::into_inner);
    // A concurrent caller may have won the race; keep the first entry.
    let entry = guard
        .entry(template.to_string())
        .or_insert_with(|| parsed.clone());
    Ok(entry.clone())
}

enum Token<'a> {
    Text(&'a str),
    Action(&'a str),
}

fn tokenize(template: &str) -> Result<Vec<Token<'_>>, TemplateError> {
    let mut tokens = Vec::new();
    let mut rest = template;
    let mut offset = 0;
    while let Some(start) = rest.find("{{") {
        if start > 0 {
            tokens.push(Token::Text(&rest[..start]));
        }
        let after_open = &rest[start + 2..];
        let end = after_open
            .find("}}")
            .ok_or(TemplateError::Unterminated(offset + start))?;
        tokens.push(Token::Action(after_open[..end].trim()));
        let consumed = start + 2 + end + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest));
    }
    Ok(tokens)
}

struct OpenBlock {
    condition: Condition,
    then: Vec<Node>,
    in_else: bool,
    otherwise: Vec<Node>,
}

fn parse_template(template: &str) -> Result<Template, TemplateError> {
    let mut root = Vec::new();
    let mut stack: Vec<OpenBlock> = Vec::new();

    fn push(root: &mut Vec<Node>, stack: &mut [OpenBlock], node: Node) {
        match stack.last_mut() {
            Some(block) if block.in_else => block.otherwise.push(node),
            Some(block) => block.then.push(node),
            None => root.push(node),
        }
    }

    for token in tokenize(template)? {
        match token {
            Token::Text(text) => push(&mut root, &mut stack, Node::Text(text.to_string())),
            Token::Action(action) => {
                let mut words = action.split_whitespace();
                match words.next() {
                    Some("if") => {
                        let rest: Vec<&str> = words.collect();
                        stack.push(OpenBlock {
                            condition: parse_condition(action, &rest)?,
                            then: Vec::new(),
                            in_else: false,
                            otherwise: Vec::new(),
                        });
                    }
                    Some("else") if action == "else" => {
                        let block = stack.last_mut().ok_or(TemplateError::Unbalanced("else"))?;
                        if block.in_else {
                            return Err(TemplateError::Unbalanced("else"));
                        }
                        block.in_else = true;
                    }
                    Some("end") if action == "end" => {
                        let block = stack.pop().ok_or(TemplateError::Unbalanced("end"))?;
                        let node = Node::If {
                            condition: block.condition,
                            then: block.then,
                            otherwise: block.otherwise,
                        };
                        push(&mut root, &mut stack, node);
                    }
                    _ => return Err(TemplateError::UnknownAction(action.to_string())),
                }
            }
        }
    }

    if !stack.is_empty() {
        return Err(TemplateError::Unclosed);
    }
    Ok(Template { nodes: root })
}

fn parse_condition(action: &str, words: &[&str]) -> Result<Condition, TemplateError> {
    let malformed = || TemplateError::MalformedCondition(action.to_string());
    let field = |word: &str| -> Result<String, TemplateError> {
        let name = word.strip_prefix('.').ok_or_else(malformed)?;
        if name.is_empty() || !name.chars().all(is_name_char) {
            return Err(malformed());
        }
        Ok(name.to_string())
    };

    match words {
        [single] => Ok(Condition::Field(field(*single)?)),
        ["not", single] => Ok(Condition::Not(field(*single)?)),
        ["and", rest @ ..] if rest.len() >= 2 => Ok(Condition::And(
            rest.iter().map(|word| field(*word)).collect::<Result<_, _>>()?,
        )),
        ["or", rest @ ..] if rest.len() >= 2 => Ok(Condition::Or(
            rest.iter().map(|word| field(*word)).collect::<Result<_, _>>()?,
        )),
        _ => Err(malformed()),
    }
}

fn render_nodes(nodes: &[Node], args: &QueryArgs, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::If {
                condition,
                then,
                otherwise,
            } => {
                if condition.evaluate(args) {
                    render_nodes(then, args, out);
                } else {
                    render_nodes(otherwise, args, out);
                }
            }
        }
    }
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

fn bind_placeholders(resolved: &str, args: &QueryArgs) -> Result<BuiltQuery, TemplateError> {
    let mut sql = String::with_capacity(resolved.len());
    let mut params = Vec::new();
    let mut in_literal = false;
    let mut chars = resolved.char_indices().peekable();

    while let Some((index, ch)) = chars.next() {
        if ch == '\'' {
            in_literal = !in_literal;
            sql.push(ch);
            continue;
        }
        if ch != '@' || in_literal {
            sql.push(ch);
            continue;
        }

        let start = index + 1;
        let mut end = start;
        while let Some(&(next_index, next)) = chars.peek() {
            if !is_name_char(next) {
                break;
            }
            end = next_index + next.len_utf8();
            chars.next();
        }
        if end == start {
            sql.push('@');
            continue;
        }

        let name = &resolved[start..end];
        let value = args
            .get(name)
            .ok_or_else(|| TemplateError::MissingValue(name.to_string()))?;
        params.push(value.clone());
        sql.push('?');
        sql.push_str(&params.len().to_string());
    }

    Ok(BuiltQuery { sql, params })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_blocks_and_numbers_placeholders_in_text_order() {
        let built = build_query(
            "SELECT * FROM posts WHERE user_id = @uid{{if .before}} AND id < @before{{end}} LIMIT @last",
            &QueryArgs::new()
                .with("last", 10i64)
                .with("before", 42i64)
                .with("uid", 7i64),
        )
        .unwrap();
        assert_eq!(
            built.sql,
            "SELECT * FROM posts WHERE user_id = ?1 AND id < ?2 LIMIT ?3"
        );
        assert_eq!(
            built.params,
            vec![QueryValue::Int(7), QueryValue::Int(42), QueryValue::Int(10)]
        );
    }

    #[test]
    fn empty_string_gate_drops_block_text_and_arguments() {
        let built = build_query(
            "SELECT id FROM users{{if .search}} WHERE username LIKE '%' || @search || '%'{{end}} ORDER BY username",
            &QueryArgs::new().with("search", ""),
        )
        .unwrap();
        assert_eq!(built.sql, "SELECT id FROM users ORDER BY username");
        assert!(built.params.is_empty());
    }

    #[test]
    fn repeated_names_get_their_own_positions() {
        let built = build_query(
            "SELECT @uid = a, @uid = b",
            &QueryArgs::new().with("uid", 3i64),
        )
        .unwrap();
        assert_eq!(built.sql, "SELECT ?1 = a, ?2 = b");
        assert_eq!(built.params, vec![QueryValue::Int(3), QueryValue::Int(3)]);
    }

    #[test]
    fn unreferenced_values_contribute_nothing() {
        let built = build_query(
            "SELECT 1{{if .auth}} WHERE x = @uid{{end}}",
            &QueryArgs::new().with("auth", false).with("uid", 9i64),
        )
        .unwrap();
        assert_eq!(built.sql, "SELECT 1");
        assert!(built.params.is_empty());
    }

    #[test]
    fn else_and_combinators() {
        let template = "{{if or .a .b}}X{{else}}Y{{end}}{{if and .a .b}}Z{{end}}{{if not .a}}N{{end}}";
        let only_b = build_query(template, &QueryArgs::new().with("b", 1i64)).unwrap();
        assert_eq!(only_b.sql, "XN");
        let both = build_query(template, &QueryArgs::new().with("a", "x").with("b", true)).unwrap();
        assert_eq!(both.sql, "XZ");
        let neither = build_query(template, &QueryArgs::new()).unwrap();
        assert_eq!(neither.sql, "YN");
    }

    #[test]
    fn nested_blocks_resolve_inside_out() {
        let built = build_query(
            "A{{if .outer}}B{{if .inner}}C{{end}}D{{end}}E",
            &QueryArgs::new().with("outer", true).with("inner", 0i64),
        )
        .unwrap();
        assert_eq!(built.sql, "ABDE");
    }

    #[test]
    fn at_signs_inside_literals_are_left_alone() {
        let built = build_query(
            "SELECT 'mail@example' , @id",
            &QueryArgs::new().with("id", 1i64),
        )
        .unwrap();
        assert_eq!(built.sql, "SELECT 'mail@example' , ?1");
        assert_eq!(built.params.len(), 1);
    }

    #[test]
    fn malformed_templates_are_rejected() {
        let args = QueryArgs::new();
        assert_eq!(
            build_query("SELECT {{if .a}}", &args).unwrap_err(),
            TemplateError::Unclosed
        );
        assert_eq!(
            build_query("SELECT {{end}}", &args).unwrap_err(),
            TemplateError::Unbalanced("end")
        );
        assert!(matches!(
            build_query("SELECT {{range .a}}{{end}}", &args).unwrap_err(),
            TemplateError::UnknownAction(_)
        ));
        assert!(matches!(
            build_query("SELECT {{if a}}{{end}}", &args).unwrap_err(),
            TemplateError::MalformedCondition(_)
        ));
        assert!(matches!(
            build_query("SELECT {{if .a", &args).unwrap_err(),
            TemplateError::Unterminated(7)
        ));
    }

    #[test]
    fn unconditional_placeholder_without_value_fails() {
        let err = build_query("SELECT * FROM t WHERE id = @id", &QueryArgs::new()).unwrap_err();
        assert_eq!(err, TemplateError::MissingValue("id".into()));
    }

    #[test]
    fn compiled_templates_are_cached_by_text() {
        let template = "SELECT 'cache-probe' {{if .x}}1{{end}}";
        let first = compiled_template(template).unwrap();
        let second = compiled_template(template).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
