use std::{collections::HashMap, fmt};

/// Secret key/value pairs passed along with a request. The values never show
/// up in `Debug` output, so requests can be logged as a whole.
#[derive(Default, Clone)]
pub(crate) struct Secrets(HashMap<String, String>);

impl AsRef<HashMap<String, String>> for Secrets {
  #[inline]
  fn as_ref(&self) -> &HashMap<String, String> {
    &self.0
  }
}

impl From<HashMap<String, String>> for Secrets {
  #[inline]
  fn from(v: HashMap<String, String>) -> Self {
    Secrets(v)
  }
}

impl fmt::Debug for Secrets {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut m = f.debug_map();
    for k in self.0.keys() {
      m.key(k).value(&"SECRET");
    }

    m.finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn debug_hides_values() {
    let secrets = Secrets::from(
      vec![("token".to_owned(), "hunter2".to_owned())]
        .into_iter()
        .collect::<HashMap<_, _>>(),
    );

    let printed = format!("{:?}", secrets);
    assert!(printed.contains("token"));
    assert!(!printed.contains("hunter2"));
  }
}
