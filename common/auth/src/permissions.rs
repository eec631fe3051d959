pub const PERM_GET_DRINKS_DETAIL: &str = "get:drinks-detail";
pub const PERM_POST_DRINKS: &str = "post:drinks";
pub const PERM_PATCH_DRINKS: &str = "patch:drinks";
pub const PERM_DELETE_DRINKS: &str = "delete:drinks";
