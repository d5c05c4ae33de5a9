//! Texts of every user-visible diagnostic

use crate::variables::OperandSide;

pub fn unrecognized_root(name: &str) -> String {
    format!("The root element <{name}> is not a server configuration element")
}

pub fn unrecognized_element(name: &str) -> String {
    format!("The element <{name}> is not recognized")
}

pub fn unrecognized_attribute(attribute: &str, element: &str) -> String {
    format!("The attribute '{attribute}' is not recognized for element <{element}>")
}

pub fn unavailable_element(element: &str, features: &[String]) -> String {
    format!(
        "The element <{element}> is not available with the enabled features; enable one of: {}",
        features.join(", ")
    )
}

pub fn duplicate_value(element: &str, value: &str, first: &str) -> String {
    format!("The <{element}> value '{value}' duplicates the value declared at {first}")
}

pub fn attribute_override(
    attribute: &str,
    element: &str,
    old_value: &str,
    old_location: &str,
    new_value: &str,
    new_location: &str,
) -> String {
    format!(
        "The '{attribute}' attribute of <{element}> is set to '{old_value}' at {old_location} \
         and overridden with '{new_value}' at {new_location}"
    )
}

pub fn element_replaced(element: &str, old_location: &str, new_location: &str) -> String {
    format!("The <{element}> element declared at {old_location} is replaced by the one at {new_location}")
}

pub fn already_included(location: &str) -> String {
    format!("The file '{location}' is already included elsewhere and is not processed again")
}

pub fn include_not_found(location: &str) -> String {
    format!("The included file '{location}' cannot be found")
}

pub fn optional_include_not_found(location: &str) -> String {
    format!("The optional included file '{location}' cannot be found")
}

pub fn include_unreadable(location: &str, details: &str) -> String {
    format!("The included file '{location}' cannot be processed: {details}")
}

pub fn dropin_unreadable(path: &str, details: &str) -> String {
    format!("The configuration dropin '{path}' cannot be processed: {details}")
}

pub fn required_attribute_empty(attribute: &str, element: &str) -> String {
    format!("The required attribute '{attribute}' of <{element}> has an empty value")
}

pub fn plain_text_password(attribute: &str) -> String {
    format!("The '{attribute}' attribute holds a plain text password; encode it")
}

pub fn unsupported_aes(attribute: &str) -> String {
    format!("The '{attribute}' attribute uses AES encoding, which the runtime does not support")
}

pub fn unsupported_hash(attribute: &str) -> String {
    format!("The '{attribute}' attribute uses hash encoding, which is not supported here")
}

pub fn unsupported_custom(attribute: &str, algorithm: &str) -> String {
    format!("The '{attribute}' attribute uses the unsupported custom encoding '{algorithm}'")
}

pub fn undefined_reference(id: &str, attribute: &str) -> String {
    format!("The id '{id}' referenced by '{attribute}' does not exist")
}

pub fn undefined_expanded_reference(id: &str, attribute: &str, variable: &str) -> String {
    format!("The id '{id}' referenced by '{attribute}' through variable '{variable}' does not exist")
}

pub fn duplicate_reference(id: &str, attribute: &str) -> String {
    format!("The id '{id}' is referenced more than once by '{attribute}'")
}

pub fn reference_and_nested(attribute: &str, nested: &str, element: &str) -> String {
    format!(
        "The <{element}> element sets '{attribute}' and also contains a nested <{nested}>; use only one"
    )
}

pub fn undefined_variable(name: &str) -> String {
    format!("The variable '{name}' is not defined")
}

pub fn missing_operand(side: OperandSide) -> String {
    format!("The expression is missing its {side} operand")
}

pub fn undefined_operand(side: OperandSide, name: &str) -> String {
    format!("The {side} operand '{name}' of the expression is not defined")
}

pub fn invalid_operand(side: OperandSide, name: &str) -> String {
    format!("The {side} operand '{name}' of the expression is not a number")
}

pub fn type_mismatch(variable: &str, expected: &str, value: &str) -> String {
    format!("The variable '{variable}' resolves to '{value}', which is not a valid {expected}")
}

pub fn invalid_duration(value: &str, attribute: &str) -> String {
    format!("The value '{value}' of '{attribute}' is not a valid duration")
}

pub fn invalid_value(value: &str, attribute: &str, details: &str) -> String {
    format!("The value '{value}' of '{attribute}' is not valid: {details}")
}

pub fn duplicate_id(id: &str, element: &str) -> String {
    format!("The id '{id}' is declared more than once for <{element}>")
}

pub fn unrecognized_feature(feature: &str) -> String {
    format!("The feature '{feature}' is not recognized")
}

pub fn superseded_feature(feature: &str, replacement: &str) -> String {
    format!("The feature '{feature}' is superseded by '{replacement}'")
}

pub fn feature_conflict(family: &str, first: &[String], second: &[String]) -> String {
    format!(
        "Conflicting versions of the '{family}' feature are enabled: {} and {}",
        first.join(" -> "),
        second.join(" -> ")
    )
}

pub fn missing_keystore() -> String {
    "SSL is enabled but no default keystore with a password is configured".to_string()
}

pub fn missing_keystore_and_user_registry() -> String {
    "Application security and SSL are enabled but no default keystore with a password \
     is configured; the server cannot start"
        .to_string()
}

pub fn missing_keystore_for_remote_ejb() -> String {
    "Remote EJB is enabled but no default keystore with a password is configured; \
     the server cannot start"
        .to_string()
}

pub fn secure_port_mismatch(port: u16, declared: &[String]) -> String {
    if declared.is_empty() {
        format!("The remote server secure port {port} is not declared by any HTTP endpoint")
    } else {
        format!(
            "The remote server secure port {port} does not match the configured HTTPS ports: {}",
            declared.join(", ")
        )
    }
}

pub fn application_missing(module: &str) -> String {
    format!("The published module '{module}' has no application element in the configuration")
}

pub fn shared_library_mismatch(module: &str, missing: &[String]) -> String {
    format!(
        "The application for '{module}' does not reference the shared libraries it needs: {}",
        missing.join(", ")
    )
}
