pub type Endpoint = str;

/// Entry point that hands off to the identity provider. The role hint skips the role picker.
pub const LOGIN: &Endpoint = "/loginuserkeycloak?user_type=end_client";
pub const ROLE_LANDING: &Endpoint = "/end_client";
pub const CONTRACT_INFO: &Endpoint = "/pages/informatiiContract";
pub const HISTORY: &Endpoint = "/pages/istoricIndecsi";
pub const DASHBOARD: &Endpoint = "/pages/dashboard";
pub const CONSUMPTION: &Endpoint = "/pages/consumul-meu";

pub const DISCOVERY_PAGES: &[&Endpoint] = &["/", DASHBOARD, CONSUMPTION];
