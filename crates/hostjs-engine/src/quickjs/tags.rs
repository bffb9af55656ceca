//! Value tags and inline value construction

use rquickjs::qjs;

pub const TAG_BIG_INT: i32 = qjs::JS_TAG_BIG_INT as i32;
pub const TAG_SYMBOL: i32 = qjs::JS_TAG_SYMBOL as i32;
pub const TAG_STRING: i32 = qjs::JS_TAG_STRING as i32;
pub const TAG_MODULE: i32 = qjs::JS_TAG_MODULE as i32;
pub const TAG_FUNCTION_BYTECODE: i32 = qjs::JS_TAG_FUNCTION_BYTECODE as i32;
pub const TAG_OBJECT: i32 = qjs::JS_TAG_OBJECT as i32;
pub const TAG_INT: i32 = qjs::JS_TAG_INT as i32;
pub const TAG_BOOL: i32 = qjs::JS_TAG_BOOL as i32;
pub const TAG_NULL: i32 = qjs::JS_TAG_NULL as i32;
pub const TAG_UNDEFINED: i32 = qjs::JS_TAG_UNDEFINED as i32;
pub const TAG_UNINITIALIZED: i32 = qjs::JS_TAG_UNINITIALIZED as i32;
pub const TAG_CATCH_OFFSET: i32 = qjs::JS_TAG_CATCH_OFFSET as i32;
pub const TAG_EXCEPTION: i32 = qjs::JS_TAG_EXCEPTION as i32;
pub const TAG_FLOAT64: i32 = qjs::JS_TAG_FLOAT64 as i32;

pub fn tag_of(value: qjs::JSValue) -> i32 {
    unsafe { qjs::JS_VALUE_GET_NORM_TAG(value) as i32 }
}

/// Negative tags carry a reference count header.
pub fn is_counted(tag: i32) -> bool {
    tag < 0
}

pub fn make(tag: i32, payload: i32) -> qjs::JSValue {
    unsafe { qjs::JS_MKVAL(tag, payload) }
}

pub fn undefined() -> qjs::JSValue {
    make(TAG_UNDEFINED, 0)
}

pub fn exception() -> qjs::JSValue {
    make(TAG_EXCEPTION, 0)
}

pub fn is_exception(value: qjs::JSValue) -> bool {
    tag_of(value) == TAG_EXCEPTION
}

/// Normalizes the `int` and `bool` flavours of C predicate results.
pub fn flag<T: Into<i32>>(result: T) -> i32 {
    result.into()
}
