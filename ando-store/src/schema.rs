/// etcd key schema for the gateway's config and session data.
pub struct Schema {
    prefix: String,
}

impl Schema {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn apis_prefix(&self) -> String {
        format!("{}/apis/", self.prefix)
    }

    pub fn api_key(&self, id: &str) -> String {
        format!("{}/apis/{}", self.prefix, id)
    }

    pub fn policies_prefix(&self) -> String {
        format!("{}/policies/", self.prefix)
    }

    pub fn policy_key(&self, id: &str) -> String {
        format!("{}/policies/{}", self.prefix, id)
    }

    pub fn sessions_prefix(&self) -> String {
        format!("{}/sessions/", self.prefix)
    }

    pub fn session_key(&self, cache_key: &str) -> String {
        format!("{}/sessions/{}", self.prefix, cache_key)
    }

    pub fn orgs_prefix(&self) -> String {
        format!("{}/orgs/", self.prefix)
    }

    pub fn org_key(&self, org_id: &str) -> String {
        format!("{}/orgs/{}", self.prefix, org_id)
    }

    pub fn consumers_prefix(&self) -> String {
        format!("{}/consumers/", self.prefix)
    }

    pub fn consumer_key(&self, username: &str) -> String {
        format!("{}/consumers/{}", self.prefix, username)
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new("/ando")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_under_prefix() {
        let schema = Schema::new("/ando");
        assert_eq!(schema.api_key("api1"), "/ando/apis/api1");
        assert_eq!(schema.policy_key("p1"), "/ando/policies/p1");
        assert_eq!(schema.session_key("hash1"), "/ando/sessions/hash1");
        assert_eq!(schema.org_key("org1"), "/ando/orgs/org1");
    }

    #[test]
    fn trailing_slash_on_prefix_is_normalised() {
        let schema = Schema::new("/ando/");
        assert_eq!(schema.api_key("api1"), "/ando/apis/api1");
    }
}
