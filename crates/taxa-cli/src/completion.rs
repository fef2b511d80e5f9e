//! Shell completion: the zsh script and the cache it reads.
//!
//! Completion scripts read taxon names, region keys and rank names from a
//! JSON file instead of opening the database on every keystroke. The cache
//! is regenerated after every successful sync, and `taxa completion
//! generate-cache` rebuilds it on demand.

use std::env;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use taxa_core::error::AppError;
use taxa_core::rank::Rank;
use taxa_db::DatasetReader;

/// zsh completion for `taxa`, installed as `_taxa`.
///
/// Dynamic values come from the cache file for the database named by
/// `-d/--database`, `$TAXA_DATABASE` or `flora.db`, and need `jq`.
pub const ZSH_SCRIPT: &str = r##"#compdef taxa

# Taxon names, region keys and ranks come from the JSON cache written by
# `taxa sync` and `taxa completion generate-cache`.

_taxa_cache_file() {
  local db=${TAXA_DATABASE:-flora.db} i
  for (( i = 1; i < $#words; i++ )); do
    case $words[i] in
      -d|--database) db=$words[i+1] ;;
      --database=*) db=${words[i]#--database=} ;;
    esac
  done
  print -r -- "${XDG_CACHE_HOME:-$HOME/.cache}/taxa/completion-cache-${${db:t}:r}.json"
}

_taxa_cached() {
  local key=$1 cache
  cache=$(_taxa_cache_file)
  [[ -r $cache ]] || return 1
  (( $+commands[jq] )) || return 1
  local -a values
  values=(${(f)"$(jq -r --arg key $key '.[$key][]' $cache 2>/dev/null)"})
  compadd -a values
}

_taxa() {
  local curcontext="$curcontext" state line
  typeset -A opt_args

  local -a db_opts format_opts
  db_opts=('(-d --database)'{-d,--database}'[SQLite dataset]:database:_files -g "*.db"')
  format_opts=('(-f --format)'{-f,--format}'[output format]:format:(table csv)')

  _arguments -C \
    '(-v --verbose)'{-v,--verbose}'[log debug output]' \
    '1: :->command' \
    '*:: :->args'

  case $state in
    command)
      local -a commands
      commands=(
        'sync:rebuild the dataset described by a config file'
        'query:run SQL against the dataset'
        'breakdown:observation and species counts below a taxon'
        'descendants:stream every taxon below a root taxon'
        'info:show dataset statistics'
        'completion:manage shell completions'
      )
      _describe -t commands 'taxa command' commands
      ;;
    args)
      case $line[1] in
        sync)
          _arguments \
            '1:config:_files -g "*.toml"' \
            '--timeout[abort after this many seconds]:seconds:' \
            '--dry-run[print the plan only]'
          ;;
        query)
          _arguments $db_opts $format_opts '1:sql:'
          ;;
        breakdown)
          _arguments $db_opts $format_opts \
            '1:taxon:_taxa_cached taxon_names' \
            '(-r --rank)'{-r,--rank}'[rank of the taxon]:rank:_taxa_cached ranks' \
            '(-l --levels)'{-l,--levels}'[ranks to break down by]:levels:_sequence _taxa_cached ranks' \
            '--region[count only this region]:region:_taxa_cached region_keys'
          ;;
        descendants)
          _arguments $format_opts \
            '1:taxon id:' \
            '(-l --limit)'{-l,--limit}'[stop after this many taxa]:count:' \
            '--per-page[page size]:size:'
          ;;
        info)
          _arguments $db_opts
          ;;
        completion)
          _arguments $db_opts '1:action:(generate-cache install)'
          ;;
      esac
      ;;
  esac
}

_taxa "$@"
"##;

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub generated_at: String,
    pub database_path: String,
    /// Modification time of the database, in seconds since the Unix epoch.
    pub database_mtime: f64,
    pub taxa_count: usize,
    pub region_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionCache {
    pub metadata: CacheMetadata,
    pub taxon_names: Vec<String>,
    pub region_keys: Vec<String>,
    pub ranks: Vec<String>,
}

/// Cache file for `database`:
/// `$XDG_CACHE_HOME/taxa/completion-cache-<stem>.json`, falling back to
/// `~/.cache`, where the installed zsh script looks for it.
pub fn cache_path(database: &Path) -> Option<PathBuf> {
    let base = env::var_os("XDG_CACHE_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".cache")))?;

    let stem = database
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "flora".to_string());

    Some(
        base.join("taxa")
            .join(format!("completion-cache-{}.json", stem)),
    )
}

/// Directory the zsh script is installed into: `~/.config/taxa/completions`.
pub fn script_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("taxa").join("completions"))
}

async fn database_mtime(database: &Path) -> Result<f64, AppError> {
    let modified = tokio::fs::metadata(database).await?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default())
}

/// Reads completion data from a published dataset.
pub async fn generate(database: &Path) -> Result<CompletionCache, AppError> {
    let reader = DatasetReader::open(database).await?;
    let taxon_names = reader.taxon_names().await?;
    let region_keys = reader.region_keys().await?;
    reader.close().await;

    let database_path = std::fs::canonicalize(database)
        .unwrap_or_else(|_| database.to_path_buf())
        .display()
        .to_string();

    Ok(CompletionCache {
        metadata: CacheMetadata {
            generated_at: Utc::now().to_rfc3339(),
            database_path,
            database_mtime: database_mtime(database).await?,
            taxa_count: taxon_names.len(),
            region_count: region_keys.len(),
        },
        taxon_names,
        region_keys,
        ranks: Rank::ALL.iter().map(|r| r.column().to_string()).collect(),
    })
}

/// Writes `contents` to `path` through a temporary file and a rename.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Writes `cache` to `path`.
pub async fn write(cache: &CompletionCache, path: &Path) -> Result<(), AppError> {
    let json = serde_json::to_vec_pretty(cache)?;
    write_atomic(path, &json).await
}

/// Returns true unless the cache at `path` was built from `database` as it
/// is now on disk.
pub async fn is_stale(path: &Path, database: &Path) -> bool {
    let Ok(bytes) = tokio::fs::read(path).await else {
        return true;
    };
    let Ok(cache) = serde_json::from_slice::<CompletionCache>(&bytes) else {
        return true;
    };
    match database_mtime(database).await {
        Ok(mtime) => cache.metadata.database_mtime != mtime,
        Err(_) => true,
    }
}

/// Writes the zsh script as `_taxa` in `dir`.
pub async fn install_script(dir: &Path) -> Result<PathBuf, AppError> {
    let path = dir.join("_taxa");
    write_atomic(&path, ZSH_SCRIPT.as_bytes()).await?;
    Ok(path)
}

/// Regenerates the cache for `database`, returning where it was written.
/// Failures are logged, never returned.
pub async fn refresh(database: &Path) -> Option<PathBuf> {
    let Some(path) = cache_path(database) else {
        tracing::warn!("No cache directory available, skipping completion cache");
        return None;
    };

    let result = async {
        let cache = generate(database).await?;
        write(&cache, &path).await
    }
    .await;

    match result {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Completion cache updated");
            Some(path)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not update completion cache");
            None
        }
    }
}
