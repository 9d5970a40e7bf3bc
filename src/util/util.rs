pub use arena::*;

mod arena;

/// Returns the unqualified name of the specified type.
macro_rules! name_of {
    ($t:ty) => {{
        let name = std::any::type_name::<$t>();
        name.rsplit("::").next().unwrap_or(name)
    }};
}
pub(crate) use name_of;
