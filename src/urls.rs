use url::Url;
use uuid::Uuid;

/// The path every API route lives under.
pub const API_PREFIX: [&str; 2] = ["api", "v1"];

/// Convenience wrapper for URL generation functions.
#[derive(Clone, Debug)]
pub struct Urls {
    /// Top-level URL, including trailing slash.
    base: Url,
}

impl Urls {
    /// Create a new instance. A missing trailing slash on `base` is
    /// added.
    pub fn new(base: impl AsRef<str>) -> Self {
        let mut base = base.as_ref().to_owned();

        if !base.ends_with('/') {
            base.push('/');
        }

        let base = Url::parse(&base).unwrap_or_else(|_| panic!("parse {} as URL", base));

        Urls { base }
    }

    pub fn users(&self) -> Url {
        self.base
            .join(&format!("{}/users/", API_PREFIX.join("/")))
            .expect("get users URL")
    }

    pub fn user(&self, id: &Uuid) -> Url {
        let id = format!("{}", id);
        self.users()
            .join(&id)
            .unwrap_or_else(|_| panic!("get URL for user {}", id))
    }
}
