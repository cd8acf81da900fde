//! Case transforms used to derive wire names from native names.

use inflector::Inflector;

/// `add_Request` -> `AddRequest`, `order_item` -> `OrderItem`, `OrderSummary` -> `OrderSummary`.
pub(crate) fn pascal_case(name: &str) -> String {
    name.to_pascal_case()
}

/// `AdvancedService` -> `advanced_service`.
pub(crate) fn snake_case(name: &str) -> String {
    name.to_snake_case()
}
