use chrono::{DateTime, Utc};
use minijinja::{Environment, context};

pub const DEFAULT_FILE_NAME: &str = "{{ app_id }}-{{ reference_id }}";

/// Check that a file name template parses.
pub fn validate_file_name(template: &str) -> Result<(), String> {
  let env = Environment::new();
  env.template_from_str(template).map(|_| ()).map_err(|e| e.to_string())
}

/// Render the download file name of a job.
pub fn render_file_name(
  template: &str,
  app_id: &str,
  reference_id: &str,
  submitted_at: DateTime<Utc>,
) -> Result<String, String> {
  let env = Environment::new();
  let rendered = env
    .render_str(
      template,
      context! {
        app_id => app_id,
        reference_id => reference_id,
        date => submitted_at.format("%Y-%m-%d").to_string(),
      },
    )
    .map_err(|e| e.to_string())?;

  let name = rendered.trim();
  if name.is_empty() {
    return Err("file name is empty".to_string());
  }
  if name.contains(['/', '\\']) {
    return Err(format!("file name '{name}' contains a path separator"));
  }
  Ok(name.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap()
  }

  #[test]
  fn test_default_template() {
    let name = render_file_name(DEFAULT_FILE_NAME, "city-map", "4f1c", date()).unwrap();
    assert_eq!(name, "city-map-4f1c");
  }

  #[test]
  fn test_date_variable() {
    let name = render_file_name("{{ app_id }}_{{ date }}.pdf", "city-map", "4f1c", date()).unwrap();
    assert_eq!(name, "city-map_2024-06-01.pdf");
  }

  #[test]
  fn test_rejects_separators_and_empty() {
    assert!(render_file_name("../{{ reference_id }}", "a", "b", date()).is_err());
    assert!(render_file_name("  ", "a", "b", date()).is_err());
  }

  #[test]
  fn test_validate_syntax() {
    assert!(validate_file_name("{{ app_id }}").is_ok());
    assert!(validate_file_name("{{ app_id").is_err());
  }
}
