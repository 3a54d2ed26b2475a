/// The three facts the admission filter needs about a request,
/// extracted once at the HTTP boundary so the core stays independent
/// of any framework's request type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Client address as a string; may be empty when unknown.
    pub ip: String,
    pub user_agent: String,
    pub path: String,
}

impl RequestInfo {
    pub fn new(
        ip: impl Into<String>,
        user_agent: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
            path: path.into(),
        }
    }
}
