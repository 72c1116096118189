use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use yaml_rust2::{Yaml, YamlEmitter, YamlLoader};

/// Load a YAML file, resolving `!include <relative path>` lines first.
///
/// Included documents are merged in order, then the including file's own
/// keys are merged on top, so a per-environment file can override a base.
pub fn load_yaml_with_includes(path: &Path) -> Result<Yaml, Box<dyn Error + Send + Sync>> {
    let res = process_includes_recursive(&path.to_path_buf())?;
    debug!(path = %path.display(), "Processed config includes");
    Ok(res)
}

/// Same as [`load_yaml_with_includes`] but re-emitted as a YAML string so
/// it can be handed to `serde_yml`.
pub fn render_yaml_with_includes(path: &Path) -> Result<String, Box<dyn Error + Send + Sync>> {
    let yaml = load_yaml_with_includes(path)?;
    let mut out_str = String::new();
    {
        let mut emitter = YamlEmitter::new(&mut out_str);
        emitter.dump(&yaml)?;
    }
    Ok(out_str)
}

fn process_includes_recursive(path: &PathBuf) -> Result<Yaml, Box<dyn Error + Send + Sync>> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let base_path = path.parent().unwrap_or(Path::new(""));

    let (includes, rest): (Vec<&str>, Vec<&str>) = contents
        .lines()
        .partition(|&line| line.trim().starts_with("!include"));

    let mut merged_includes: Option<Yaml> = None;
    for line in includes {
        let include_path = line.trim().trim_start_matches("!include").trim();
        let included = process_includes_recursive(&base_path.join(include_path))?;
        merged_includes = Some(match merged_includes {
            Some(acc) => merge_yaml(&acc, &included),
            None => included,
        });
    }

    let rest_yamls = YamlLoader::load_from_str(&rest.join("\n"))?;
    let merged_rest = rest_yamls
        .into_iter()
        .reduce(|acc: Yaml, next: Yaml| merge_yaml(&acc, &next));

    match (merged_includes, merged_rest) {
        (Some(includes), Some(rest)) => Ok(merge_yaml(&includes, &rest)),
        (Some(includes), None) => Ok(includes),
        (None, Some(rest)) => Ok(rest),
        (None, None) => Err(format!("Empty config file: {}", path.display()).into()),
    }
}

fn merge_yaml(base: &Yaml, override_yaml: &Yaml) -> Yaml {
    match (base, override_yaml) {
        (Yaml::Hash(base_hash), Yaml::Hash(override_hash)) => {
            let mut result = base_hash.clone();
            for (key, value) in override_hash {
                match base_hash.get(key) {
                    Some(base_value) => {
                        result.insert(key.clone(), merge_yaml(base_value, value));
                    }
                    None => {
                        result.insert(key.clone(), value.clone());
                    }
                }
            }
            Yaml::Hash(result)
        }
        // An empty override document (`~`) keeps the base
        (base_value, Yaml::Null) => base_value.clone(),
        (_, override_value) => override_value.clone(),
    }
}
