pub mod auth_code;
pub mod auth_flow;
pub mod client;
pub mod device_code_grant;
pub mod federated_authorization;
pub mod federated_provider;
pub mod login_failure_policy;
pub mod refresh_grant;
pub mod scheduler_lock;
pub mod signing_key;
pub mod tenant;
pub mod tenant_rate_limit;
pub mod user;
pub mod user_failed_login;

pub use auth_code::Entity as AuthCode;
pub use auth_flow::Entity as AuthFlow;
pub use client::Entity as Client;
pub use device_code_grant::Entity as DeviceCodeGrant;
pub use federated_authorization::Entity as FederatedAuthorization;
pub use federated_provider::Entity as FederatedProvider;
pub use login_failure_policy::Entity as LoginFailurePolicy;
pub use refresh_grant::Entity as RefreshGrant;
pub use scheduler_lock::Entity as SchedulerLock;
pub use signing_key::Entity as SigningKey;
pub use tenant::Entity as Tenant;
pub use tenant_rate_limit::Entity as TenantRateLimit;
pub use user::Entity as User;
pub use user_failed_login::Entity as UserFailedLogin;
