#[derive(Debug, Clone, Default)]
pub(crate) struct Values {
  pub(crate) serial_port: Option<String>,
  pub(crate) log: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ParseError {
  #[error("Failed reading env var {name}")]
  EnvVarRead {
    name: &'static str,
    #[source]
    source: std::env::VarError,
  },
}

pub(crate) fn parse() -> Result<Values, ParseError> {
  let _ = dotenv::dotenv();

  let values = Values {
    serial_port: optional("RTUPOLL_SERIAL_PORT")?,
    log: optional("RTUPOLL_LOG")?,
  };

  Ok(values)
}

fn optional(name: &'static str) -> Result<Option<String>, ParseError> {
  match std::env::var(name) {
    Ok(value) if value.trim().is_empty() => Ok(None),
    Ok(value) => Ok(Some(value)),
    Err(std::env::VarError::NotPresent) => Ok(None),
    Err(source) => Err(ParseError::EnvVarRead { name, source }),
  }
}
