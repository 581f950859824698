pub mod customer;
pub mod part;
pub mod ticket;
pub mod user;

pub use self::{
    customer::Customer, part::Part, ticket::Ticket, user::User,
};
