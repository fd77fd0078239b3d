//! Document adapter: one query interface over markup trees and JSON payloads.
//!
//! A [`Location`] is compiled once, when a site definition is loaded, into
//! both a CSS query and a JSON path; the document it runs against decides
//! which one is used. The rest of the engine only sees [`Node`] and never
//! matches on the document shape itself.
//!
//! CSS queries run on top of `scraper` selectors with a few extensions
//! trackers rely on: `:contains("text")`, `:eq(n)`, `:first`, `:last`,
//! comma alternatives, and a leading combinator (`> td`, `+ td`) that is
//! relative to the current node. The literal `:self` addresses the current
//! node in either shape.
//!
//! `scraper` trees are `!Send`; parse and extract inside one synchronous
//! call and never hold a [`Document`] across an `.await`.

use std::collections::{HashMap, HashSet};

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{EngineError, EngineResult, ExtractError};

/// Sentinel location meaning "the current node".
pub const SELF_LOCATION: &str = ":self";

/// Declared shape of a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    #[default]
    Html,
    Json,
}

/// A parsed response body.
#[derive(Debug)]
pub enum Document {
    Html(Html),
    Json(Value),
}

impl Document {
    pub fn parse_html(body: &str) -> Self {
        Document::Html(Html::parse_document(body))
    }

    pub fn parse_json(body: &str) -> EngineResult<Self> {
        serde_json::from_str(body)
            .map(Document::Json)
            .map_err(|e| EngineError::Parse(format!("response is not valid JSON: {e}")))
    }

    /// Parse `body` as the declared kind.
    pub fn parse(body: &str, kind: DocumentKind) -> EngineResult<Self> {
        match kind {
            DocumentKind::Html => Ok(Self::parse_html(body)),
            DocumentKind::Json => Self::parse_json(body),
        }
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::Html(_) => DocumentKind::Html,
            Document::Json(_) => DocumentKind::Json,
        }
    }

    pub fn root(&self) -> Node<'_> {
        match self {
            Document::Html(html) => Node::Document(html),
            Document::Json(value) => Node::Json(value),
        }
    }
}

/// A position inside a [`Document`] that queries can be scoped to.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Document(&'a Html),
    Element(ElementRef<'a>),
    Json(&'a Value),
}

impl<'a> Node<'a> {
    /// First node matching `location`, if any.
    pub fn find(&self, location: &Location) -> Result<Option<Node<'a>>, ExtractError> {
        match (&location.target, self) {
            (Target::SelfNode, _) => Ok(Some(*self)),
            (Target::Query { path, .. }, Node::Json(value)) => {
                Ok(resolve_path(value, path).map(Node::Json))
            }
            _ => Ok(self.find_elements(location)?.into_iter().next()),
        }
    }

    /// Every node matching `location`. JSON arrays expand to their items.
    pub fn find_all(&self, location: &Location) -> Result<Vec<Node<'a>>, ExtractError> {
        match (&location.target, self) {
            (Target::SelfNode, Node::Json(Value::Array(items))) => {
                Ok(items.iter().map(Node::Json).collect())
            }
            (Target::SelfNode, _) => Ok(vec![*self]),
            (Target::Query { path, .. }, Node::Json(value)) => {
                Ok(match resolve_path(value, path) {
                    Some(Value::Array(items)) => items.iter().map(Node::Json).collect(),
                    Some(found) => vec![Node::Json(found)],
                    None => Vec::new(),
                })
            }
            _ => self.find_elements(location),
        }
    }

    /// True when `location` resolves to at least one node.
    pub fn exists(&self, location: &Location) -> Result<bool, ExtractError> {
        Ok(self.find(location)?.is_some())
    }

    fn find_elements(&self, location: &Location) -> Result<Vec<Node<'a>>, ExtractError> {
        let Target::Query { css, .. } = &location.target else {
            return Ok(vec![*self]);
        };
        let query = css
            .as_ref()
            .map_err(|_| ExtractError::Unqueryable(location.raw.clone()))?;
        let found = match self {
            Node::Document(html) => query.select(html.root_element(), true),
            Node::Element(el) => query.select(*el, false),
            Node::Json(_) => Vec::new(),
        };
        Ok(found.into_iter().map(Node::Element).collect())
    }

    /// Rendered text, whitespace-collapsed.
    pub fn text(&self) -> String {
        match self {
            Node::Document(html) => element_text(&html.root_element()),
            Node::Element(el) => element_text(el),
            Node::Json(value) => json_text(value),
        }
    }

    /// Attribute of an element, or member of a JSON object.
    pub fn attr(&self, name: &str) -> Option<String> {
        match self {
            Node::Document(html) => html.root_element().value().attr(name).map(str::to_string),
            Node::Element(el) => el.value().attr(name).map(str::to_string),
            Node::Json(Value::Object(map)) => map.get(name).map(json_text),
            Node::Json(_) => None,
        }
    }

    /// Raw value of the node: JSON values keep their type, markup becomes text.
    pub fn value(&self) -> Value {
        match self {
            Node::Json(value) => (*value).clone(),
            other => Value::String(other.text()),
        }
    }
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn json_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── Locations ────────────────────────────────────────────────────────────────

/// A compiled location specifier.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct Location {
    raw: String,
    target: Target,
}

#[derive(Debug, Clone)]
enum Target {
    SelfNode,
    Query {
        css: Result<CssQuery, String>,
        path: Vec<PathSegment>,
    },
}

impl Location {
    pub fn parse(raw: &str) -> EngineResult<Self> {
        Self::try_from(raw.to_string()).map_err(|reason| EngineError::InvalidSelector {
            selector: raw.to_string(),
            reason,
        })
    }

    /// The location that addresses the current node.
    pub fn current() -> Self {
        Self {
            raw: SELF_LOCATION.to_string(),
            target: Target::SelfNode,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_self(&self) -> bool {
        matches!(self.target, Target::SelfNode)
    }

    /// Fail unless this location can be queried against `kind` documents.
    pub fn check(&self, kind: DocumentKind) -> EngineResult<()> {
        match (&self.target, kind) {
            (Target::Query { css: Err(reason), .. }, DocumentKind::Html) => {
                Err(EngineError::InvalidSelector {
                    selector: self.raw.clone(),
                    reason: reason.clone(),
                })
            }
            _ => Ok(()),
        }
    }
}

impl TryFrom<String> for Location {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("empty location".to_string());
        }
        let target = if trimmed == SELF_LOCATION {
            Target::SelfNode
        } else {
            Target::Query {
                css: CssQuery::parse(trimmed),
                path: parse_path(trimmed),
            }
        };
        Ok(Self {
            raw: trimmed.to_string(),
            target,
        })
    }
}

// ── CSS queries ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CssQuery {
    alternatives: Vec<Vec<Step>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
    Adjacent,
    Sibling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pick {
    Eq(usize),
    First,
    Last,
}

#[derive(Debug, Clone)]
struct Step {
    combinator: Combinator,
    selector: Selector,
    contains: Vec<String>,
    pick: Option<Pick>,
}

impl CssQuery {
    fn parse(raw: &str) -> Result<Self, String> {
        let alternatives = split_top_level(raw, ',')
            .iter()
            .map(|alt| parse_chain(alt))
            .collect::<Result<Vec<_>, _>>()?;
        if alternatives.iter().any(Vec::is_empty) {
            return Err("empty selector alternative".to_string());
        }
        Ok(Self { alternatives })
    }

    fn select<'a>(&self, scope: ElementRef<'a>, include_self: bool) -> Vec<ElementRef<'a>> {
        if let [only] = self.alternatives.as_slice() {
            return run_chain(only, scope, include_self);
        }

        let mut seen = HashSet::new();
        let mut found: Vec<ElementRef<'a>> = self
            .alternatives
            .iter()
            .flat_map(|steps| run_chain(steps, scope, include_self))
            .filter(|el| seen.insert(el.id()))
            .collect();

        let top = scope.ancestors().last().unwrap_or(*scope);
        let order: HashMap<_, usize> = top
            .descendants()
            .enumerate()
            .map(|(i, node)| (node.id(), i))
            .collect();
        found.sort_by_key(|el| order.get(&el.id()).copied().unwrap_or(usize::MAX));
        found
    }
}

fn run_chain<'a>(steps: &[Step], scope: ElementRef<'a>, include_self: bool) -> Vec<ElementRef<'a>> {
    let mut current = vec![scope];
    for (index, step) in steps.iter().enumerate() {
        let mut seen = HashSet::new();
        let mut next = Vec::new();
        for el in &current {
            for candidate in step.candidates(*el, index == 0 && include_self) {
                if step.matches(&candidate) && seen.insert(candidate.id()) {
                    next.push(candidate);
                }
            }
        }
        current = step.apply_pick(next);
        if current.is_empty() {
            break;
        }
    }
    current
}

impl Step {
    fn candidates<'a>(&self, el: ElementRef<'a>, include_self: bool) -> Vec<ElementRef<'a>> {
        match self.combinator {
            Combinator::Descendant => el
                .descendants()
                .skip(usize::from(!include_self))
                .filter_map(ElementRef::wrap)
                .collect(),
            Combinator::Child => el.children().filter_map(ElementRef::wrap).collect(),
            Combinator::Adjacent => el
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .take(1)
                .collect(),
            Combinator::Sibling => el.next_siblings().filter_map(ElementRef::wrap).collect(),
        }
    }

    fn matches(&self, el: &ElementRef<'_>) -> bool {
        if !self.selector.matches(el) {
            return false;
        }
        if self.contains.is_empty() {
            return true;
        }
        let text: String = el.text().collect();
        self.contains.iter().all(|needle| text.contains(needle.as_str()))
    }

    fn apply_pick<'a>(&self, found: Vec<ElementRef<'a>>) -> Vec<ElementRef<'a>> {
        match self.pick {
            None => found,
            Some(Pick::Eq(n)) => found.into_iter().nth(n).into_iter().collect(),
            Some(Pick::First) => found.into_iter().next().into_iter().collect(),
            Some(Pick::Last) => found.into_iter().last().into_iter().collect(),
        }
    }
}

/// Split on `sep` outside quotes, brackets and parentheses.
fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;

    for ch in s.chars() {
        if let Some(q) = quote {
            current.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                current.push(ch);
            }
            '(' | '[' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' => {
                depth -= 1;
                current.push(ch);
            }
            c if c == sep && depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts.into_iter().map(|p| p.trim().to_string()).collect()
}

fn parse_chain(s: &str) -> Result<Vec<Step>, String> {
    let mut steps = Vec::new();
    let mut pending: Option<Combinator> = None;
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;

    let mut flush = |current: &mut String, pending: &mut Option<Combinator>| -> Result<(), String> {
        if !current.is_empty() {
            let combinator = pending.take().unwrap_or(Combinator::Descendant);
            steps.push(parse_compound(current, combinator)?);
            current.clear();
        }
        Ok(())
    };

    for ch in s.chars() {
        if let Some(q) = quote {
            current.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                current.push(ch);
            }
            '(' | '[' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' => {
                depth -= 1;
                current.push(ch);
            }
            c if depth == 0 && (c.is_whitespace() || matches!(c, '>' | '+' | '~')) => {
                flush(&mut current, &mut pending)?;
                match c {
                    '>' => pending = Some(Combinator::Child),
                    '+' => pending = Some(Combinator::Adjacent),
                    '~' => pending = Some(Combinator::Sibling),
                    _ => {}
                }
            }
            _ => current.push(ch),
        }
    }
    flush(&mut current, &mut pending)?;

    if pending.is_some() {
        return Err(format!("dangling combinator in '{s}'"));
    }
    Ok(steps)
}

/// Strip the jQuery-style extensions from one compound and compile the rest.
fn parse_compound(text: &str, combinator: Combinator) -> Result<Step, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut css = String::new();
    let mut contains = Vec::new();
    let mut pick = None;
    let mut bracket = 0i32;
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            css.push(c);
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '[' => bracket += 1,
            ']' => bracket -= 1,
            _ => {}
        }
        if c == ':' && bracket == 0 {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '-') {
                end += 1;
            }
            let name: String = chars[start..end].iter().collect();
            match name.as_str() {
                "contains" | "eq" => {
                    let (arg, next) = parenthesized(&chars, end)
                        .ok_or_else(|| format!("unterminated :{name}( in '{text}'"))?;
                    if name == "contains" {
                        contains.push(unquote(&arg));
                    } else {
                        let n = arg
                            .trim()
                            .parse()
                            .map_err(|_| format!("bad :eq index '{arg}' in '{text}'"))?;
                        pick = Some(Pick::Eq(n));
                    }
                    i = next;
                    continue;
                }
                "first" => {
                    pick = Some(Pick::First);
                    i = end;
                    continue;
                }
                "last" => {
                    pick = Some(Pick::Last);
                    i = end;
                    continue;
                }
                _ => {}
            }
        }
        css.push(c);
        i += 1;
    }

    let css = css.trim();
    let css = if css.is_empty() { "*" } else { css };
    let selector = Selector::parse(css).map_err(|e| format!("{e:?}"))?;

    Ok(Step {
        combinator,
        selector,
        contains,
        pick,
    })
}

/// Read `( ... )` starting at `open`; returns the inner text and the index
/// after the closing parenthesis.
fn parenthesized(chars: &[char], open: usize) -> Option<(String, usize)> {
    if chars.get(open) != Some(&'(') {
        return None;
    }
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, &c) in chars.iter().enumerate().skip(open) {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((chars[open + 1..i].iter().collect(), i + 1));
                }
            }
            _ => {}
        }
    }
    None
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return s[1..s.len() - 1].to_string();
        }
    }
    s.to_string()
}

// ── JSON paths ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

fn parse_path(raw: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    for part in raw.split('.').filter(|p| !p.is_empty()) {
        let (name, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if !name.is_empty() {
            segments.push(PathSegment::Key(name.to_string()));
        }
        while let Some(close) = rest.find(']') {
            let inner = unquote(&rest[1..close]);
            segments.push(match inner.parse() {
                Ok(index) => PathSegment::Index(index),
                Err(_) => PathSegment::Key(inner),
            });
            rest = &rest[close + 1..];
            if !rest.starts_with('[') {
                break;
            }
        }
    }
    segments
}

fn resolve_path<'a>(root: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    let found = path.iter().try_fold(root, |value, segment| match (segment, value) {
        (PathSegment::Key(key), Value::Object(map)) => map.get(key),
        (PathSegment::Key(key), Value::Array(items)) => {
            key.parse::<usize>().ok().and_then(|i| items.get(i))
        }
        (PathSegment::Index(i), Value::Array(items)) => items.get(*i),
        _ => None,
    })?;
    (!found.is_null()).then_some(found)
}
