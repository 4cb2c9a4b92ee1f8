pub mod account;
pub mod approval;
pub mod consent;
pub mod invite;
pub mod plan;
pub mod session;
pub mod token;

pub use account::{Account, AccountRole, AccountStatus, ChildProfile, NewAccount, ParentUpgrade};
pub use approval::{
    ApprovalContext, ApprovalStatus, ApprovalUpdate, NewApproval, ParentApproval, ParentState,
};
pub use consent::{ConsentInput, LinkPermissions, ParentConsent, ParentLink, ParentLinkRole};
pub use invite::Invite;
pub use plan::{
    BillingCycle, Membership, MembershipRole, MembershipStatus, Plan, SeatAvailability,
};
pub use session::Session;
pub use token::{ConsumedToken, IssuedToken, Token, TokenKind};
