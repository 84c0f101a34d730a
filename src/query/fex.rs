use std::sync::Arc;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{all_consuming, map_res, opt, value},
    multi::separated_list1,
    sequence::{delimited, preceded},
};
use crate::core::error::{Error, Result};
use crate::core::types::{is_valid_field_name, Comment, Field, Record, RecordItem};
use crate::reader::parser::parse_field_text;
use crate::writer::text_writer::field_text;

/// Which occurrences of a name a selector picks, counted from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscript {
    All,
    One(usize),
    Range(usize, usize),  // Inclusive
}

impl Subscript {
    pub fn contains(&self, occurrence: usize) -> bool {
        match *self {
            Subscript::All => true,
            Subscript::One(i) => occurrence == i,
            Subscript::Range(i, j) => (i..=j).contains(&occurrence),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelector {
    pub name: String,
    pub subscript: Subscript,
    /// Output name in projections (`name:alias`).
    pub alias: Option<String>,
    /// `name%`: targets commented-out occurrences of the field.
    pub comments: bool,
}

impl FieldSelector {
    fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Action applied by set-field mutations to every selected field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetAction {
    Rename(String),
    Set(String),
    Add(String),
    SetOrAdd(String),
    Delete,
    Comment,
}

impl SetAction {
    /// Build an action from its name and argument.
    pub fn parse(action: &str, argument: Option<&str>) -> Result<Self> {
        let required = || {
            argument
                .map(String::from)
                .ok_or_else(|| Error::invalid_argument(format!("action '{}' needs an argument", action)))
        };
        let parsed = match action {
            "rename" => SetAction::Rename(required()?),
            "set" => SetAction::Set(required()?),
            "add" => SetAction::Add(required()?),
            "set-or-add" | "setadd" => SetAction::SetOrAdd(required()?),
            "delete" | "delete-field" => SetAction::Delete,
            "comment" | "comment-field" => SetAction::Comment,
            other => return Err(Error::invalid_argument(format!("unknown set action '{}'", other))),
        };
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            SetAction::Rename(name) if !is_valid_field_name(name) => {
                Err(Error::invalid_argument(format!("invalid field name '{}'", name)))
            }
            _ => Ok(()),
        }
    }
}

/// A compiled field expression: an ordered list of selectors.
#[derive(Debug, Clone)]
pub struct FieldExpr {
    source: Arc<str>,
    selectors: Arc<[FieldSelector]>,
}

type RawSelector<'a> = (&'a str, Option<(usize, Option<usize>)>, Option<&'a str>);

fn name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '%').parse(input)
}

fn index(input: &str) -> IResult<&str, usize> {
    map_res(digit1, str::parse::<usize>).parse(input)
}

fn subscript(input: &str) -> IResult<&str, (usize, Option<usize>)> {
    delimited(
        (char('['), multispace0),
        (index, opt(preceded((multispace0, char('-'), multispace0), index))),
        (multispace0, char(']')),
    )
    .parse(input)
}

fn selector(input: &str) -> IResult<&str, RawSelector<'_>> {
    (name, opt(subscript), opt(preceded(char(':'), name))).parse(input)
}

fn separator(input: &str) -> IResult<&str, ()> {
    alt((
        value((), (multispace0, char(','), multispace0)),
        value((), multispace1),
    ))
    .parse(input)
}

fn selector_list(input: &str) -> IResult<&str, Vec<RawSelector<'_>>> {
    all_consuming(delimited(multispace0, separated_list1(separator, selector), multispace0))
        .parse(input)
}

fn build_selector((raw_name, subscript, alias): RawSelector<'_>) -> std::result::Result<FieldSelector, String> {
    let (field, comments) = match raw_name.strip_suffix('%') {
        Some(stripped) if !stripped.is_empty() && !stripped.starts_with('%') => (stripped, true),
        _ => (raw_name, false),
    };
    if !is_valid_field_name(field) {
        return Err(format!("invalid field name '{}'", field));
    }
    if let Some(alias) = alias.filter(|a| !is_valid_field_name(a)) {
        return Err(format!("invalid alias '{}'", alias));
    }
    let subscript = match subscript {
        None => Subscript::All,
        Some((i, None)) => Subscript::One(i),
        Some((i, Some(j))) if i <= j => Subscript::Range(i, j),
        Some((i, Some(j))) => return Err(format!("empty range [{}-{}] on '{}'", i, j, field)),
    };
    Ok(FieldSelector {
        name: field.to_string(),
        subscript,
        alias: alias.map(String::from),
        comments,
    })
}

impl FieldExpr {
    pub fn compile(text: &str) -> Result<Self> {
        let (_, raw) = selector_list(text)
            .map_err(|_| Error::compile(format!("malformed field expression '{}'", text)))?;
        let selectors = raw
            .into_iter()
            .map(build_selector)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|message| Error::compile(format!("{} in '{}'", message, text)))?;
        Ok(FieldExpr {
            source: Arc::from(text),
            selectors: selectors.into(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn selectors(&self) -> &[FieldSelector] {
        &self.selectors
    }

    /// Field names in selector order, without duplicates.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for selector in self.selectors.iter() {
            if !names.contains(&selector.name.as_str()) {
                names.push(&selector.name);
            }
        }
        names
    }

    /// New record holding the selected fields, in selector order.
    pub fn project(&self, record: &Record) -> Record {
        let mut projected = Record {
            items: Vec::new(),
            location: record.location,
        };
        for selector in self.selectors.iter() {
            if selector.comments {
                for (_, field) in commented_fields(record, &selector.name)
                    .filter(|(n, _)| selector.subscript.contains(*n))
                {
                    let renamed = Field::new(selector.output_name(), field.value);
                    projected.push_comment(Comment::new(field_text(&renamed)));
                }
                continue;
            }
            for (occurrence, value) in record.values(&selector.name).enumerate() {
                if selector.subscript.contains(occurrence) {
                    projected.push_field(Field::new(selector.output_name(), value));
                }
            }
        }
        projected
    }

    /// First selected value per selector; the key used by sorting and grouping.
    pub fn values_for(&self, record: &Record) -> Vec<Option<String>> {
        self.selectors
            .iter()
            .map(|selector| {
                record
                    .values(&selector.name)
                    .enumerate()
                    .find(|(n, _)| selector.subscript.contains(*n))
                    .map(|(_, v)| v.to_string())
            })
            .collect()
    }

    fn selecting(&self, name: &str, occurrence: usize, comments: bool) -> Option<usize> {
        self.selectors.iter().position(|s| {
            s.comments == comments && s.name == name && s.subscript.contains(occurrence)
        })
    }

    /// Apply a set-field action to every selected field, returning the
    /// updated record. `set` leaves absent fields alone; `add` and
    /// `set-or-add` append a new occurrence at the end of the record.
    pub fn apply(&self, record: &Record, action: &SetAction) -> Record {
        let mut matched = vec![false; self.selectors.len()];
        let mut field_seen: Vec<(&str, usize)> = Vec::new();
        let mut comment_seen: Vec<(String, usize)> = Vec::new();
        let mut items = Vec::with_capacity(record.items.len());

        for item in &record.items {
            match item {
                RecordItem::Field(field) => {
                    let occurrence = bump(&mut field_seen, &field.name);
                    match self.selecting(&field.name, occurrence, false) {
                        Some(s) => {
                            matched[s] = true;
                            items.extend(act_on_field(field, action));
                        }
                        None => items.push(item.clone()),
                    }
                }
                RecordItem::Comment(comment) => {
                    let target = parse_field_text(&comment.text).and_then(|field| {
                        let occurrence = bump_owned(&mut comment_seen, &field.name);
                        self.selecting(&field.name, occurrence, true).map(|s| (s, field))
                    });
                    match target {
                        Some((s, field)) => {
                            matched[s] = true;
                            items.extend(act_on_commented(&field, action));
                        }
                        None => items.push(item.clone()),
                    }
                }
            }
        }

        // Additions go after everything else, one per distinct selected name
        let mut added: Vec<(&str, bool)> = Vec::new();
        for (s, selector) in self.selectors.iter().enumerate() {
            let new_value = match action {
                SetAction::Add(value) => value,
                SetAction::SetOrAdd(value) if !matched[s] => value,
                _ => continue,
            };
            if added.contains(&(selector.name.as_str(), selector.comments)) {
                continue;
            }
            added.push((selector.name.as_str(), selector.comments));
            let field = Field::new(selector.name.clone(), new_value.clone());
            items.push(if selector.comments {
                RecordItem::Comment(Comment::new(field_text(&field)))
            } else {
                RecordItem::Field(field)
            });
        }

        Record {
            items,
            location: record.location,
        }
    }
}

fn bump<'a>(seen: &mut Vec<(&'a str, usize)>, name: &'a str) -> usize {
    match seen.iter_mut().find(|(n, _)| *n == name) {
        Some((_, count)) => {
            *count += 1;
            *count - 1
        }
        None => {
            seen.push((name, 1));
            0
        }
    }
}

fn bump_owned(seen: &mut Vec<(String, usize)>, name: &str) -> usize {
    match seen.iter_mut().find(|(n, _)| n == name) {
        Some((_, count)) => {
            *count += 1;
            *count - 1
        }
        None => {
            seen.push((name.to_string(), 1));
            0
        }
    }
}

/// Commented-out occurrences of `name`, numbered in record order.
fn commented_fields<'r>(record: &'r Record, name: &'r str) -> impl Iterator<Item = (usize, Field)> + 'r {
    record
        .comments()
        .filter_map(|comment| parse_field_text(&comment.text))
        .filter(move |field| field.name == name)
        .enumerate()
}

fn act_on_field(field: &Field, action: &SetAction) -> Option<RecordItem> {
    match action {
        SetAction::Rename(name) => Some(RecordItem::Field(Field::new(name.clone(), field.value.clone()))),
        SetAction::Set(value) | SetAction::SetOrAdd(value) => {
            Some(RecordItem::Field(Field::new(field.name.clone(), value.clone())))
        }
        SetAction::Add(_) => Some(RecordItem::Field(field.clone())),
        SetAction::Delete => None,
        SetAction::Comment => Some(RecordItem::Comment(Comment::new(field_text(field)))),
    }
}

fn act_on_commented(field: &Field, action: &SetAction) -> Option<RecordItem> {
    let commented = |f: Field| Some(RecordItem::Comment(Comment::new(field_text(&f))));
    match action {
        SetAction::Rename(name) => commented(Field::new(name.clone(), field.value.clone())),
        SetAction::Set(value) | SetAction::SetOrAdd(value) => {
            commented(Field::new(field.name.clone(), value.clone()))
        }
        SetAction::Add(_) | SetAction::Comment => commented(field.clone()),
        SetAction::Delete => None,
    }
}
