//! # CLI Command Implementations

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use stitcher_core::primitives::{SIZE, URI};
use stitcher_core::registry::normalize;
use stitcher_core::{
    Clique, Component, DataSourceFactory, EntityFactory, EntityRegistry, NodeId, Record,
    RedbStore, Scalar, StitchError, StitchKey, Value, merge,
};

/// Largest record file `load` accepts (500 MB).
const MAX_LOAD_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Records between two progress log lines.
const PROGRESS_EVERY: usize = 1000;

type Factory = EntityFactory<RedbStore>;

// =============================================================================
// INPUT VALIDATION
// =============================================================================

/// Resolve `path` to an existing regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, StitchError> {
    let canonical = path.canonicalize().map_err(|e| {
        StitchError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;
    if !canonical.is_file() {
        return Err(StitchError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    Ok(canonical)
}

fn validate_file_size(path: &Path, max_size: u64) -> Result<u64, StitchError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| StitchError::IoError(format!("Cannot read file metadata: {}", e)))?;
    if metadata.len() > max_size {
        return Err(StitchError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(metadata.len())
}

// =============================================================================
// ARGUMENT PARSING
// =============================================================================

/// Parse `KEY=field,KEY=field,...`. A key may appear more than once.
pub fn parse_mappings(arg: &str) -> Result<Vec<(StitchKey, String)>, StitchError> {
    let mappings = arg
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (key, field) = split_pair(entry)?;
            Ok((StitchKey::try_from(key)?, field.to_string()))
        })
        .collect::<Result<Vec<_>, StitchError>>()?;
    if mappings.is_empty() {
        return Err(StitchError::InvalidConfig("no field mappings given".to_string()));
    }
    Ok(mappings)
}

/// Parse `KEY=value,...`, where `*` stands for every key.
pub fn parse_blacklist(arg: &str) -> Result<Vec<(Option<StitchKey>, String)>, StitchError> {
    arg.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (key, value) = split_pair(entry)?;
            let key = match key {
                "*" => None,
                name => Some(StitchKey::try_from(name)?),
            };
            Ok((key, value.to_string()))
        })
        .collect()
}

fn split_pair(entry: &str) -> Result<(&str, &str), StitchError> {
    match entry.split_once('=') {
        Some((key, rest)) if !key.trim().is_empty() && !rest.trim().is_empty() => {
            Ok((key.trim(), rest.trim()))
        }
        _ => Err(StitchError::InvalidConfig(format!(
            "'{entry}' is not of the form KEY=value"
        ))),
    }
}

// =============================================================================
// RECORD INPUT
// =============================================================================

/// Convert a JSON value to a property value. Nulls and empty arrays have
/// no value; nested objects are kept as their JSON text.
pub fn json_to_value(json: &serde_json::Value) -> Option<Value> {
    match json {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(Value::from(b.to_string())),
        serde_json::Value::Number(n) => Some(match n.as_i64() {
            Some(v) => Value::from(v),
            None => Value::from(n.to_string()),
        }),
        serde_json::Value::String(s) => Some(Value::from(s.as_str())),
        serde_json::Value::Array(items) => {
            let mut scalars: Vec<Scalar> = items
                .iter()
                .filter_map(json_to_value)
                .flat_map(|v| v.elements().to_vec())
                .collect();
            let first = scalars.first()?.scalar_type();
            // mixed arrays fall back to strings
            if scalars.iter().any(|s| s.scalar_type() != first) {
                scalars = scalars
                    .into_iter()
                    .map(|s| Scalar::Str(s.to_string()))
                    .collect();
            }
            merge([&Value::from_elements(scalars)]).ok()
        }
        serde_json::Value::Object(_) => Some(Value::from(json.to_string())),
    }
}

pub fn record_from_json(json: &serde_json::Value) -> Result<Record, StitchError> {
    let object = json.as_object().ok_or_else(|| {
        StitchError::DeserializationError("record is not a JSON object".to_string())
    })?;
    Ok(object
        .iter()
        .filter_map(|(field, value)| json_to_value(value).map(|v| (field.clone(), v)))
        .collect())
}

/// Read a JSON array of records, or one record per line. A malformed
/// document fails as a whole; a malformed line or element only fails
/// itself.
pub fn read_records(path: &Path) -> Result<Vec<Result<Record, StitchError>>, StitchError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| StitchError::IoError(format!("Read file: {}", e)))?;

    if text.trim_start().starts_with('[') {
        let items: Vec<serde_json::Value> = serde_json::from_str(&text)
            .map_err(|e| StitchError::DeserializationError(format!("Parse records: {}", e)))?;
        return Ok(items.iter().map(record_from_json).collect());
    }

    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str::<serde_json::Value>(line)
                .map_err(|e| StitchError::DeserializationError(format!("Parse record: {}", e)))
                .and_then(|json| record_from_json(&json))
        })
        .collect())
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

fn scalar_json(scalar: &Scalar) -> serde_json::Value {
    match scalar {
        Scalar::Str(s) => serde_json::Value::from(s.as_str()),
        Scalar::Long(v) => serde_json::Value::from(*v),
    }
}

/// A property value as plain JSON: a scalar, or an array of scalars.
pub fn value_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Single(s) => scalar_json(s),
        Value::Array(items) => items.iter().map(scalar_json).collect(),
    }
}

fn ids(nodes: &[NodeId]) -> Vec<u64> {
    nodes.iter().map(|n| n.0).collect()
}

fn join_ids(nodes: &[NodeId]) -> String {
    nodes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// LOAD COMMAND
// =============================================================================

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub source: String,
    pub file: PathBuf,
    pub mappings: Vec<(StitchKey, String)>,
    pub id_field: Option<String>,
    pub blacklist: Vec<(Option<StitchKey>, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub source: String,
    pub source_key: String,
    pub read: usize,
    pub loaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub instances: i64,
}

/// Load every record of `options.file` into its data source. Failing
/// records are logged and counted; they do not stop the load.
pub fn cmd_load(factory: &Factory, options: &LoadOptions) -> Result<LoadSummary, StitchError> {
    let path = validate_file_path(&options.file)?;
    let size = validate_file_size(&path, MAX_LOAD_FILE_SIZE)?;
    tracing::info!(source = %options.source, file = %path.display(), "loading records");
    let records = read_records(&path)?;

    let mut registry = factory.execute(|tx, config| {
        let source = DataSourceFactory::register(tx, &options.source)?;
        if source.get(tx, URI)?.is_none() {
            source.set(tx, URI, path.display().to_string().into())?;
            source.set(tx, SIZE, Value::from(size as i64))?;
        }
        let mut registry = EntityRegistry::new(tx, source, config.clone())?;
        for (key, field) in &options.mappings {
            registry.add(*key, field.clone());
        }
        if let Some(field) = &options.id_field {
            registry.set_id_field(field.clone());
        }
        for (key, value) in &options.blacklist {
            registry.add_blacklist(*key, &[value.as_str()]);
        }
        Ok(registry)
    })?;

    let mut summary = LoadSummary {
        source: options.source.clone(),
        source_key: DataSourceFactory::source_key(&options.source),
        ..LoadSummary::default()
    };
    for (index, record) in records.into_iter().enumerate() {
        summary.read += 1;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(record = index, error = %e, "unreadable record");
                summary.failed += 1;
                continue;
            }
        };

        let outcome = factory.execute(|tx, _| {
            if registry.id_field().is_some() {
                registry.register_if_absent(tx, &record)
            } else {
                registry.register(tx, &record).map(Some)
            }
        });
        match outcome {
            Ok(Some(_)) => summary.loaded += 1,
            Ok(None) => summary.skipped += 1,
            Err(e) => {
                tracing::warn!(record = index, error = %e, "record failed to load");
                summary.failed += 1;
            }
        }

        if summary.read % PROGRESS_EVERY == 0 {
            tracing::info!(read = summary.read, loaded = summary.loaded, "loading");
        }
    }

    summary.instances = factory.execute(|tx, _| registry.finish(tx))?;
    Ok(summary)
}

pub fn print_load_summary(summary: &LoadSummary, json: bool) {
    if json {
        print_json(summary);
        return;
    }
    println!("Loaded {} of {} records into '{}' ({})", summary.loaded, summary.read, summary.source, summary.source_key);
    if summary.skipped > 0 {
        println!("Skipped {} already registered", summary.skipped);
    }
    if summary.failed > 0 {
        println!("Failed  {} (see log)", summary.failed);
    }
    println!("Source now has {} instances", summary.instances);
}

// =============================================================================
// SOURCES COMMAND
// =============================================================================

#[derive(Debug, Serialize)]
struct SourceRow {
    key: String,
    name: String,
    instances: i64,
    uri: Option<String>,
}

pub fn cmd_sources(factory: &Factory, json: bool) -> Result<(), StitchError> {
    let rows = factory.execute(|tx, _| {
        DataSourceFactory::list(tx)?
            .into_iter()
            .map(|source| {
                Ok(SourceRow {
                    key: source.key(tx)?,
                    name: source.name(tx)?,
                    instances: source.instances(tx)?,
                    uri: source.get(tx, URI)?.map(|v| v.to_string()),
                })
            })
            .collect::<Result<Vec<_>, StitchError>>()
    })?;

    if json {
        print_json(&rows);
        return Ok(());
    }
    println!("Data Sources");
    println!("============");
    for row in &rows {
        println!(
            "{}  {:<24} {:>8} instances  {}",
            row.key,
            row.name,
            row.instances,
            row.uri.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

// =============================================================================
// COMPONENTS COMMAND
// =============================================================================

#[derive(Debug, Serialize)]
struct ComponentRow {
    id: String,
    root: u64,
    size: usize,
    members: Vec<u64>,
}

impl From<&Component> for ComponentRow {
    fn from(c: &Component) -> Self {
        Self {
            id: c.id().to_string(),
            root: c.root().0,
            size: c.size(),
            members: ids(c.members()),
        }
    }
}

pub fn cmd_components(factory: &Factory, json: bool, singletons: bool) -> Result<(), StitchError> {
    let components: Vec<Component> = factory
        .components()?
        .into_iter()
        .filter(|c| singletons || !c.is_singleton())
        .collect();

    if json {
        let rows: Vec<ComponentRow> = components.iter().map(ComponentRow::from).collect();
        print_json(&rows);
        return Ok(());
    }
    println!("Components: {}", components.len());
    for c in &components {
        println!("{}  size={:<5} root={:<8} [{}]", c.id(), c.size(), c.root(), join_ids(c.members()));
    }
    Ok(())
}

// =============================================================================
// CLIQUES COMMAND
// =============================================================================

#[derive(Debug, Serialize)]
struct CliqueRow {
    component: String,
    id: String,
    size: usize,
    weight: u64,
    members: Vec<u64>,
    values: BTreeMap<String, Vec<serde_json::Value>>,
}

impl CliqueRow {
    fn new(component: &Component, clique: &Clique) -> Self {
        Self {
            component: component.id().to_string(),
            id: clique.id().to_string(),
            size: clique.size(),
            weight: clique.weight(),
            members: ids(clique.members()),
            values: clique
                .values()
                .iter()
                .map(|(key, values)| (key.name().to_string(), values.iter().map(scalar_json).collect()))
                .collect(),
        }
    }
}

pub fn cmd_cliques(factory: &Factory, json: bool, component: Option<&str>) -> Result<(), StitchError> {
    let components: Vec<Component> = factory
        .components()?
        .into_iter()
        .filter(|c| !c.is_singleton())
        .filter(|c| component.is_none_or(|id| c.id() == id || c.root().to_string() == id))
        .collect();
    if let (Some(id), true) = (component, components.is_empty()) {
        println!("No multi-member component {}", id);
        return Ok(());
    }

    let mut rows = Vec::new();
    for c in &components {
        factory.cliques(c, &mut |clique: &Clique| {
            rows.push(CliqueRow::new(c, clique));
            true
        })?;
    }

    if json {
        print_json(&rows);
        return Ok(());
    }
    println!("Cliques: {}", rows.len());
    for row in &rows {
        println!("{} in {}  size={} weight={}", row.id, row.component, row.size, row.weight);
        for (key, values) in &row.values {
            let values: Vec<String> = values.iter().map(ToString::to_string).collect();
            println!("  {:<12} {}", key, values.join(", "));
        }
    }
    Ok(())
}

// =============================================================================
// RESOLVE COMMAND
// =============================================================================

pub fn cmd_resolve(factory: &Factory, json: bool) -> Result<(), StitchError> {
    let mut groups: Vec<Vec<NodeId>> = Vec::new();
    let summary = factory.resolve(|group: &[NodeId]| groups.push(group.to_vec()))?;

    if json {
        let output = serde_json::json!({
            "components": summary.components,
            "cliques": summary.cliques,
            "groups": summary.groups,
            "singletons": summary.singletons,
            "resolved": groups.iter().map(|g| ids(g)).collect::<Vec<_>>(),
        });
        print_json(&output);
        return Ok(());
    }

    println!("Entity Resolution");
    println!("=================");
    println!("Components: {}", summary.components);
    println!("Cliques:    {}", summary.cliques);
    println!("Groups:     {}", summary.groups);
    println!("Singletons: {}", summary.singletons);
    for (n, group) in groups.iter().filter(|g| g.len() > 1).enumerate() {
        println!("  group {:>4}: [{}]", n + 1, join_ids(group));
    }
    Ok(())
}

// =============================================================================
// METRICS COMMAND
// =============================================================================

pub fn cmd_metrics(factory: &Factory, json: bool) -> Result<(), StitchError> {
    let metrics = factory.metrics()?;

    if json {
        print_json(&metrics);
        return Ok(());
    }
    println!("Stitched Graph Metrics");
    println!("======================");
    println!("Entities:      {}", metrics.entity_count);
    println!("Stitches:      {}", metrics.stitch_count);
    println!("Components:    {}", metrics.connected_component_count);
    println!("  multi-member {}", metrics.multi_member_components());
    println!("  singletons   {}", metrics.singleton_count);
    println!();
    println!("Stitches per key:");
    for (key, count) in &metrics.stitch_histogram {
        println!("  {:<16} {}", key, count);
    }
    println!("Component sizes:");
    for (size, count) in &metrics.component_size_histogram {
        println!("  {:>6} x {}", size, count);
    }
    Ok(())
}

// =============================================================================
// FIND COMMAND
// =============================================================================

#[derive(Debug, Serialize)]
struct EntityRow {
    id: u64,
    source: Option<String>,
    payload_id: Option<serde_json::Value>,
    value: serde_json::Value,
}

pub fn cmd_find(factory: &Factory, json: bool, key: &str, value: &str) -> Result<(), StitchError> {
    let key = StitchKey::try_from(key)?;
    let Some(term) = normalize(key, &Value::from(value)).and_then(|v| v.as_single().cloned()) else {
        println!("'{}' is not a valid {} value", value, key);
        return Ok(());
    };

    let entities = factory.find(key, &term)?;
    let rows = factory.execute(|tx, _| {
        entities
            .iter()
            .map(|entity| {
                Ok(EntityRow {
                    id: entity.id().0,
                    source: entity.datasource_key(tx)?,
                    payload_id: entity.payload(tx)?.and_then(|p| p.id).as_ref().map(value_json),
                    value: entity
                        .get(tx, key)?
                        .as_ref()
                        .map(value_json)
                        .unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, StitchError>>()
    })?;

    if json {
        print_json(&rows);
        return Ok(());
    }
    println!("{} = {}: {} entities", key, term, rows.len());
    for row in &rows {
        println!(
            "  {:<8} source={} id={} {}={}",
            row.id,
            row.source.as_deref().unwrap_or("-"),
            row.payload_id.as_ref().map(ToString::to_string).unwrap_or_else(|| "-".to_string()),
            key,
            row.value
        );
    }
    Ok(())
}

// =============================================================================
// DELETE-SOURCE COMMAND
// =============================================================================

pub fn cmd_delete_source(factory: &Factory, json: bool, name: &str) -> Result<(), StitchError> {
    let source = factory
        .source_by_name(name)?
        .ok_or_else(|| StitchError::MissingDataSource(name.to_string()))?;
    let deleted = factory.delete_source(source)?;

    if json {
        print_json(&serde_json::json!({ "source": name, "deleted": deleted }));
    } else {
        println!("Deleted data source '{}' and {} entities", name, deleted);
    }
    Ok(())
}

// =============================================================================
// HISTORY COMMAND
// =============================================================================

#[derive(Debug, Serialize)]
struct SnapshotRow {
    snapshot: u64,
    key: String,
    created: i64,
    old_value: Option<serde_json::Value>,
    new_value: Option<serde_json::Value>,
}

pub fn cmd_history(factory: &Factory, json: bool, id: u64, key: Option<&str>) -> Result<(), StitchError> {
    let rows: Vec<SnapshotRow> = factory
        .history(NodeId(id), key)?
        .into_iter()
        .map(|s| SnapshotRow {
            snapshot: s.id.0,
            key: s.key,
            created: s.created,
            old_value: s.old_value.as_ref().map(value_json),
            new_value: s.new_value.as_ref().map(value_json),
        })
        .collect();

    if json {
        print_json(&rows);
        return Ok(());
    }
    println!("History of node {}: {} changes", id, rows.len());
    let show = |v: &Option<serde_json::Value>| v.as_ref().map(ToString::to_string).unwrap_or_else(|| "-".to_string());
    for row in &rows {
        println!("  {}  {:<16} {} -> {}", row.created, row.key, show(&row.old_value), show(&row.new_value));
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use stitcher_core::StitchConfig;

    #[test]
    fn mappings_parse_and_reject_garbage() {
        let parsed = parse_mappings("I_UNII=unii, N_Name=name,N_Name=synonyms").unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], (StitchKey::I_UNII, "unii".to_string()));
        assert!(matches!(parse_mappings("I_FOO=x"), Err(StitchError::UnknownStitchKey(_))));
        assert!(matches!(parse_mappings("I_UNII"), Err(StitchError::InvalidConfig(_))));
        assert!(matches!(parse_mappings(" , "), Err(StitchError::InvalidConfig(_))));
    }

    #[test]
    fn blacklist_accepts_wildcard() {
        let parsed = parse_blacklist("*=UNKNOWN,N_Name=WATER").unwrap();
        assert_eq!(parsed[0], (None, "UNKNOWN".to_string()));
        assert_eq!(parsed[1], (Some(StitchKey::N_Name), "WATER".to_string()));
    }

    #[test]
    fn json_values_convert() {
        use serde_json::json;
        assert_eq!(json_to_value(&json!(null)), None);
        assert_eq!(json_to_value(&json!(42)), Some(Value::from(42)));
        assert_eq!(json_to_value(&json!(1.5)), Some(Value::from("1.5")));
        assert_eq!(json_to_value(&json!(["a", "b", "a"])), Some(Value::strings(&["a", "b"])));
        assert_eq!(json_to_value(&json!([1, "x"])), Some(Value::strings(&["1", "x"])));
        assert_eq!(json_to_value(&json!([])), None);
        assert_eq!(value_json(&Value::longs(&[1, 2])), json!([1, 2]));
    }

    #[test]
    fn records_read_from_array_and_lines() {
        let dir = tempfile::tempdir().unwrap();
        let array = dir.path().join("a.json");
        std::fs::write(&array, r#"[{"id": 1, "name": "x"}, 7]"#).unwrap();
        let records = read_records(&array).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].as_ref().unwrap().get("name"), Some(&Value::from("x")));
        assert!(records[1].is_err());

        let lines = dir.path().join("b.jsonl");
        std::fs::write(&lines, "{\"id\": 1}\n\nnot json\n{\"id\": 2}\n").unwrap();
        let records = read_records(&lines).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[1].is_err());
    }

    #[test]
    fn load_counts_loaded_skipped_and_failed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("drugs.json");
        std::fs::write(
            &file,
            r#"[
                {"id": "D1", "unii": "R16CO5Y76E", "name": "Aspirin"},
                {"id": "D2", "unii": "WK2XYI10QM", "name": "Ibuprofen"},
                {"id": "D1", "unii": "R16CO5Y76E", "name": "Aspirin"},
                "bogus"
            ]"#,
        )
        .unwrap();
        let factory = EntityFactory::open(dir.path().join("db.redb"), StitchConfig::default()).unwrap();
        let options = LoadOptions {
            source: "drugs".to_string(),
            file,
            mappings: parse_mappings("I_UNII=unii,N_Name=name").unwrap(),
            id_field: Some("id".to_string()),
            blacklist: Vec::new(),
        };

        let summary = cmd_load(&factory, &options).unwrap();
        assert_eq!(summary.read, 4);
        assert_eq!(summary.loaded, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.instances, 2);

        // a second run registers nothing new
        let again = cmd_load(&factory, &options).unwrap();
        assert_eq!(again.loaded, 0);
        assert_eq!(again.instances, 2);
        assert_eq!(factory.entities().unwrap().len(), 2);
    }
}
