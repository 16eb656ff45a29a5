//! Heuristic entity/relationship synthesis (spec §4.3, §4.5): used when no
//! tree-sitter grammar is registered for a file's language. Produces a file
//! entity, one module entity, and naming-based class/function/import/uses
//! edges. Every synthesized item is marked `"heuristic": true` in its
//! metadata so downstream consumers can discount its confidence.

use std::collections::HashMap;

use crate::error::EngineError;
use crate::model::{Entity, EntityType, Location, Position, Relationship, RelationshipType};

const CLASS_KEYWORDS: &[&str] = &["class ", "struct ", "interface "];
const FUNCTION_KEYWORDS: &[&str] = &["fn ", "function ", "def ", "func "];
const IMPORT_KEYWORDS: &[&str] = &["import ", "use ", "require(", "#include"];

/// Synthesizes a best-effort entity/relationship set for `file_path` by
/// scanning `source` line by line for common class/function/import
/// keywords. This is a heuristic fallback, not a parser: it never fails on
/// malformed source, only on an empty file path.
pub fn synthesize(file_path: &str, source: &str) -> Result<(Vec<Entity>, Vec<Relationship>), EngineError> {
    if file_path.is_empty() {
        return Err(EngineError::invalid("heuristic synthesis requires a non-empty file path"));
    }

    let mut entities = Vec::new();
    let mut relationships = Vec::new();

    let file_entity = heuristic_entity(file_path, EntityType::File, file_path, 0);
    let module_entity = heuristic_entity(module_name(file_path).as_str(), EntityType::Module, file_path, 0);
    relationships.push(Relationship::new(file_entity.id, module_entity.id, RelationshipType::Contains));

    let file_id = file_entity.id;
    let module_id = module_entity.id;
    entities.push(file_entity);
    entities.push(module_entity);

    for (line_no, line) in source.lines().enumerate() {
        let trimmed = line.trim_start();
        let index = (line_no as u32) * 1_000;

        if let Some(name) = extract_after_keyword(trimmed, CLASS_KEYWORDS) {
            let class_entity = heuristic_entity(&name, EntityType::Class, file_path, index);
            relationships.push(Relationship::new(module_id, class_entity.id, RelationshipType::DefinesClass));
            entities.push(class_entity);
        } else if let Some(name) = extract_after_keyword(trimmed, FUNCTION_KEYWORDS) {
            let func_entity = heuristic_entity(&name, EntityType::Function, file_path, index);
            relationships.push(Relationship::new(module_id, func_entity.id, RelationshipType::DefinesFunction));
            entities.push(func_entity);
        } else if IMPORT_KEYWORDS.iter().any(|k| trimmed.starts_with(k)) {
            if let Some(target) = extract_import_target(trimmed) {
                let import_entity = heuristic_entity(&target, EntityType::Module, &target, 0);
                relationships.push(Relationship::new(file_id, import_entity.id, RelationshipType::Imports));
                entities.push(import_entity);
            }
        }
    }

    Ok((entities, relationships))
}

fn heuristic_entity(name: &str, entity_type: EntityType, file_path: &str, start_index: u32) -> Entity {
    let mut entity = Entity::new(
        name,
        entity_type,
        file_path,
        Location {
            start: Position::with_index((start_index / 1_000).max(1), 0, start_index),
            end: Position::with_index((start_index / 1_000).max(1) + 1, 0, start_index + 1),
        },
    );
    let mut metadata = HashMap::new();
    metadata.insert("heuristic".to_string(), serde_json::json!(true));
    entity.metadata = metadata;
    entity
}

fn module_name(file_path: &str) -> String {
    std::path::Path::new(file_path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_path.to_string())
}

fn extract_after_keyword(line: &str, keywords: &[&str]) -> Option<String> {
    for keyword in keywords {
        if let Some(rest) = line.strip_prefix(keyword) {
            let name: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if !name.is_empty() {
                return Some(name);
            }
        }
    }
    None
}

fn extract_import_target(line: &str) -> Option<String> {
    let candidates = [line.split('"').nth(1), line.split('\'').nth(1)];
    candidates
        .into_iter()
        .flatten()
        .next()
        .map(|s| s.to_string())
        .or_else(|| {
            line.split_whitespace()
                .find(|tok| !IMPORT_KEYWORDS.iter().any(|k| k.trim().eq_ignore_ascii_case(tok.trim_end_matches(';'))))
                .map(|s| s.trim_end_matches(';').to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesizes_file_and_module_entities_for_any_source() {
        let (entities, relationships) = synthesize("src/foo.py", "# nothing interesting here").unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(relationships.len(), 1);
        assert!(entities.iter().all(|e| e.metadata.get("heuristic") == Some(&serde_json::json!(true))));
    }

    #[test]
    fn detects_class_and_function_declarations() {
        let source = "class Widget:\n    def render(self):\n        pass\n";
        let (entities, _) = synthesize("src/widget.py", source).unwrap();
        assert!(entities.iter().any(|e| e.entity_type == EntityType::Class && e.name == "Widget"));
        assert!(entities.iter().any(|e| e.entity_type == EntityType::Function && e.name == "render"));
    }

    #[test]
    fn empty_file_path_is_rejected() {
        assert!(synthesize("", "x").is_err());
    }
}
