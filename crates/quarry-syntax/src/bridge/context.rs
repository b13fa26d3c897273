use quarry_core::{ConversionMode, Expr, QueryError, Result};

/// Mode-dependent handling of constructs a builder cannot map.
#[derive(Debug)]
pub struct BuildContext {
    mode: ConversionMode,
    warnings: Vec<String>,
}

impl BuildContext {
    pub fn new(mode: ConversionMode) -> Self {
        Self {
            mode,
            warnings: Vec::new(),
        }
    }

    pub fn mode(&self) -> ConversionMode {
        self.mode
    }

    /// Unmapped expression construct.
    ///
    /// STRICT fails, FLEXIBLE keeps `raw` verbatim, LENIENT drops it.
    pub fn unhandled(&mut self, what: &str, raw: impl Into<String>) -> Result<Option<Expr>> {
        match self.mode {
            ConversionMode::Strict => Err(QueryError::validation(format!(
                "unsupported construct: {what}"
            ))),
            ConversionMode::Flexible => Ok(Some(Expr::Raw(raw.into()))),
            ConversionMode::Lenient => {
                self.warnings.push(format!("dropped unsupported {what}"));
                Ok(None)
            }
        }
    }

    /// Unmapped clause or stage with no expression stand-in.
    ///
    /// STRICT fails; the other modes skip it with a warning.
    pub fn skip(&mut self, what: &str) -> Result<()> {
        if self.mode == ConversionMode::Strict {
            return Err(QueryError::validation(format!(
                "unsupported construct: {what}"
            )));
        }
        self.warnings.push(format!("ignored unsupported {what}"));
        Ok(())
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<String> {
        self.warnings
    }
}
