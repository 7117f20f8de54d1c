use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub group: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupQuery {
    pub base: Option<String>,
}
