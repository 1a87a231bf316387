use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

const ENV_OVERRIDES: [(&str, &str); 3] = [
  (
    "MOMENTUM_SUPABASE_URL",
    "remote.url"
  ),
  (
    "MOMENTUM_SUPABASE_ANON_KEY",
    "remote.anon_key"
  ),
  (
    "MOMENTUM_AUTH_REDIRECT_URL",
    "auth.redirect_url"
  )
];

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  pub fn defaults() -> Self {
    let mut cfg = Config {
      map:          HashMap::new(),
      loaded_files: vec![]
    };

    for (key, value) in [
      ("data.location", "~/.momentum"),
      ("color", "on"),
      ("offline", "off"),
      ("remote.url", ""),
      ("remote.anon_key", ""),
      ("auth.redirect_url", "")
    ] {
      cfg
        .map
        .insert(key.to_string(), value.to_string());
    }

    cfg
  }

  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::defaults();

    let rc = resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading momentumrc");
      cfg.load_file(&path)?;
    } else {
      warn!(
        "no momentumrc found; using \
         defaults"
      );
    }

    cfg.apply_env(|name| {
      std::env::var(name).ok()
    });

    Ok(cfg)
  }

  pub fn apply_env<F>(
    &mut self,
    lookup: F
  ) where
    F: Fn(&str) -> Option<String>
  {
    for (var, key) in ENV_OVERRIDES {
      if let Some(value) = lookup(var)
        && !value.trim().is_empty()
      {
        debug!(var, key, "applying environment override");
        self
          .map
          .insert(key.to_string(), value);
      }
    }
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) = cfg
    .get("data.location")
    .filter(|v| !v.trim().is_empty())
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var("MOMENTUMRC")
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    return Ok(None);
  };
  let candidate =
    home.join(".momentumrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".momentum"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use tempfile::tempdir;

  use super::*;

  #[test]
  fn rc_file_with_include_and_comments() {
    let temp =
      tempdir().expect("tempdir");
    let extra =
      temp.path().join("extra.rc");
    fs::write(
      &extra,
      "remote.anon_key = anon123\n"
    )
    .expect("write include");

    let rc = temp.path().join("main.rc");
    fs::write(
      &rc,
      "# hosted project\n\
       remote.url = https://project.example.co  # trailing\n\
       include extra.rc\n\
       color=off\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(&rc))
      .expect("load config");
    assert_eq!(
      cfg.get("remote.url").as_deref(),
      Some("https://project.example.co")
    );
    assert_eq!(
      cfg.get("remote.anon_key").as_deref(),
      Some("anon123")
    );
    assert_eq!(
      cfg.get_bool("color"),
      Some(false)
    );
    assert_eq!(cfg.loaded_files.len(), 2);
  }

  #[test]
  fn invalid_line_is_an_error() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("bad.rc");
    fs::write(&rc, "just words\n")
      .expect("write rc");

    let err = Config::load(Some(&rc))
      .expect_err("should fail");
    assert!(
      err
        .to_string()
        .contains("invalid config line")
    );
  }

  #[test]
  fn environment_then_overrides_win() {
    let mut cfg = Config::defaults();
    cfg.apply_env(|name| match name {
      | "MOMENTUM_SUPABASE_URL" => {
        Some(
          "https://env.example.co"
            .to_string()
        )
      }
      | "MOMENTUM_AUTH_REDIRECT_URL" => {
        Some("  ".to_string())
      }
      | _ => None
    });
    assert_eq!(
      cfg.get("remote.url").as_deref(),
      Some("https://env.example.co")
    );
    assert_eq!(
      cfg
        .get("auth.redirect_url")
        .as_deref(),
      Some("")
    );

    cfg.apply_overrides(vec![(
      "rc.remote.url".to_string(),
      "https://cli.example.co"
        .to_string()
    )]);
    assert_eq!(
      cfg.get("remote.url").as_deref(),
      Some("https://cli.example.co")
    );
  }

  #[test]
  fn data_dir_override_is_created() {
    let temp =
      tempdir().expect("tempdir");
    let target =
      temp.path().join("nested/data");
    let dir = resolve_data_dir(
      &Config::defaults(),
      Some(&target)
    )
    .expect("resolve");
    assert_eq!(dir, target);
    assert!(target.is_dir());
  }
}
