// ABOUTME: Reads a Liquibase-style XML master changelog and everything it includes
// ABOUTME: Produces the property declarations and one flat, ordered operation list

use crate::changelog::operation::{ChangeOperation, ColumnSpec, PropertyDeclaration};
use crate::error::ReplayError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::{Path, PathBuf};

/// Everything the replayer needs from a changelog tree.
#[derive(Debug, Default, Clone)]
pub struct Changelog {
    /// Every `<property>` found in the master and in included documents
    pub properties: Vec<PropertyDeclaration>,
    /// Operations in file order, then document order within a file
    pub operations: Vec<ChangeOperation>,
    /// Documents read, in the order they were visited
    pub files: Vec<PathBuf>,
}

/// Load a master changelog and all documents it references.
///
/// `<include file=...>` and `<includeAll path=...>` are followed depth-first
/// in document order. Paths are resolved against the master's directory, or
/// against the including document when `relativeToChangelogFile="true"`.
/// `<changeSet>` elements found in the master itself are replayed in place.
///
/// # Errors
///
/// Returns a [`ReplayError`] if any document is missing, is not well-formed,
/// lacks a required attribute, or includes itself.
///
/// # Examples
///
/// ```no_run
/// # use changelog_transfer::changelog::load_changelog;
/// # fn example() -> anyhow::Result<()> {
/// let changelog = load_changelog("db/changelog-master.xml".as_ref())?;
/// println!("{} operations", changelog.operations.len());
/// # Ok(())
/// # }
/// ```
pub fn load_changelog(master: &Path) -> Result<Changelog, ReplayError> {
    let root_dir = master
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let mut changelog = Changelog::default();
    let mut active = Vec::new();
    visit_document(master, &root_dir, &mut active, &mut changelog)?;

    tracing::debug!(
        "Read {} changelog document(s), {} properties, {} operations",
        changelog.files.len(),
        changelog.properties.len(),
        changelog.operations.len()
    );
    Ok(changelog)
}

fn visit_document(
    path: &Path,
    root_dir: &Path,
    active: &mut Vec<PathBuf>,
    changelog: &mut Changelog,
) -> Result<(), ReplayError> {
    let canonical = std::fs::canonicalize(path).map_err(|e| ReplayError::io(path, e))?;
    if active.contains(&canonical) {
        return Err(ReplayError::IncludeCycle(path.to_path_buf()));
    }

    let text = std::fs::read_to_string(path).map_err(|e| ReplayError::io(path, e))?;
    let root = parse_tree(path, &text)?;
    tracing::debug!("Processing changelog document {}", path.display());

    changelog.files.push(path.to_path_buf());
    let mut properties = Vec::new();
    root.descendants_named("property", &mut properties);
    for property in properties {
        changelog.properties.push(read_property(path, property)?);
    }

    active.push(canonical);
    let here = path.parent().map(Path::to_path_buf).unwrap_or_default();
    for child in &root.children {
        match child.name.to_ascii_lowercase().as_str() {
            "include" => {
                let file = child.required(path, "file")?;
                let base = if child.flag("relativeToChangelogFile") {
                    &here
                } else {
                    root_dir
                };
                visit_document(&base.join(file), root_dir, active, changelog)?;
            }
            "includeall" => {
                let dir = child.required(path, "path")?;
                let base = if child.flag("relativeToChangelogFile") {
                    &here
                } else {
                    root_dir
                };
                for file in list_changelog_files(&base.join(dir))? {
                    visit_document(&file, root_dir, active, changelog)?;
                }
            }
            "changeset" => {
                for element in &child.children {
                    read_operations(path, element, &mut changelog.operations)?;
                }
            }
            _ => {}
        }
    }
    active.pop();
    Ok(())
}

/// `*.xml` files of a directory in lexical order, as includeAll replays them.
fn list_changelog_files(dir: &Path) -> Result<Vec<PathBuf>, ReplayError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ReplayError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ReplayError::io(dir, e))?;
        let path = entry.path();
        let is_xml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("xml"))
            .unwrap_or(false);
        if path.is_file() && is_xml {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_property(path: &Path, element: &XmlElement) -> Result<PropertyDeclaration, ReplayError> {
    let dialects = element
        .attr("dbms")
        .map(|list| {
            list.split(',')
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(PropertyDeclaration {
        name: element.required(path, "name")?.to_string(),
        value: element.attr("value").unwrap_or_default().to_string(),
        dialects,
    })
}

/// Translate one direct child of a changeSet into zero or more operations.
fn read_operations(
    path: &Path,
    element: &XmlElement,
    out: &mut Vec<ChangeOperation>,
) -> Result<(), ReplayError> {
    let operation = match element.name.to_ascii_lowercase().as_str() {
        "createtable" => ChangeOperation::CreateTable {
            table: element.required(path, "tableName")?.to_string(),
            columns: read_columns(path, element)?,
        },
        "addcolumn" => ChangeOperation::AddColumn {
            table: element.required(path, "tableName")?.to_string(),
            columns: read_columns(path, element)?,
        },
        "dropcolumn" => {
            let table = element.required(path, "tableName")?;
            if let Some(column) = element.attr("columnName") {
                ChangeOperation::DropColumn {
                    table: table.to_string(),
                    column: column.to_string(),
                }
            } else {
                let nested: Vec<&XmlElement> = element.children_named("column").collect();
                if nested.is_empty() {
                    return Err(element.missing(path, "columnName"));
                }
                for column in nested {
                    out.push(ChangeOperation::DropColumn {
                        table: table.to_string(),
                        column: column.required(path, "name")?.to_string(),
                    });
                }
                return Ok(());
            }
        }
        "renamecolumn" => ChangeOperation::RenameColumn {
            table: element.required(path, "tableName")?.to_string(),
            old_name: element.required(path, "oldColumnName")?.to_string(),
            new_name: element.required(path, "newColumnName")?.to_string(),
            new_type: element
                .attr("columnDataType")
                .filter(|t| !t.trim().is_empty())
                .map(str::to_string),
        },
        "modifydatatype" => ChangeOperation::ModifyType {
            table: element.required(path, "tableName")?.to_string(),
            column: element.required(path, "columnName")?.to_string(),
            new_type: element.required(path, "newDataType")?.to_string(),
        },
        "droptable" => ChangeOperation::DropTable {
            table: element.required(path, "tableName")?.to_string(),
        },
        "renametable" => ChangeOperation::RenameTable {
            old_name: element.required(path, "oldTableName")?.to_string(),
            new_name: element.required(path, "newTableName")?.to_string(),
        },
        _ => ChangeOperation::Unhandled {
            kind: element.name.clone(),
        },
    };
    out.push(operation);
    Ok(())
}

fn read_columns(path: &Path, element: &XmlElement) -> Result<Vec<ColumnSpec>, ReplayError> {
    let mut columns = Vec::new();
    element.descendants_named("column", &mut columns);
    columns
        .into_iter()
        .map(|column| {
            Ok(ColumnSpec::new(
                column.required(path, "name")?,
                column.attr("type").unwrap_or_default(),
            ))
        })
        .collect()
}

/// Minimal element tree; text content is irrelevant to the replay.
#[derive(Debug, Default)]
struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlElement>,
}

impl XmlElement {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn required(&self, path: &Path, name: &str) -> Result<&str, ReplayError> {
        self.attr(name).ok_or_else(|| self.missing(path, name))
    }

    fn missing(&self, path: &Path, name: &str) -> ReplayError {
        ReplayError::MissingAttribute {
            path: path.to_path_buf(),
            element: self.name.clone(),
            attribute: name.to_string(),
        }
    }

    fn flag(&self, name: &str) -> bool {
        self.attr(name)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children
            .iter()
            .filter(move |child| child.name.eq_ignore_ascii_case(name))
    }

    fn descendants_named<'a>(&'a self, name: &str, out: &mut Vec<&'a XmlElement>) {
        for child in &self.children {
            if child.name.eq_ignore_ascii_case(name) {
                out.push(child);
            }
            child.descendants_named(name, out);
        }
    }
}

fn parse_tree(path: &Path, text: &str) -> Result<XmlElement, ReplayError> {
    let xml_error = |message: String| ReplayError::Xml {
        path: path.to_path_buf(),
        message,
    };

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(element_from(&start).map_err(xml_error)?),
            Ok(Event::Empty(start)) => {
                let element = element_from(&start).map_err(xml_error)?;
                attach(&mut stack, &mut root, element).map_err(xml_error)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| xml_error("unexpected closing tag".to_string()))?;
                attach(&mut stack, &mut root, element).map_err(xml_error)?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(xml_error(format!(
                    "{} (at byte {})",
                    e,
                    reader.buffer_position()
                )))
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(xml_error(format!("element <{}> is never closed", open.name)));
    }
    root.ok_or_else(|| xml_error("document has no root element".to_string()))
}

fn element_from(start: &BytesStart<'_>) -> Result<XmlElement, String> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| e.to_string())?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(XmlElement {
        name,
        attributes,
        children: Vec::new(),
    })
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), String> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(format!("second root element <{}>", element.name)),
    }
}
