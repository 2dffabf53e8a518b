//! Runtime entry points
//!
//! The emitted IL calls into a C runtime that owns strings, arrays, DATA
//! reading, and console I/O. QBE needs no forward declarations for external
//! calls, so this module is the single place the symbol names live.
//!
//! The DATA reader does not take the tables as arguments: the emitter
//! exports `$basic_data_values`, `$basic_data_types`, and
//! `$basic_data_count` from the data section and the runtime binds to them
//! at link time.
//!
//! # String descriptors
//!
//! `string_*` entry points take and return pointers to the runtime's
//! refcounted descriptor:
//!
//! | offset | size | field      |
//! |--------|------|------------|
//! | 0      | 8    | data (u8* ASCII / u32* UTF-32) |
//! | 8      | 8    | length in characters |
//! | 16     | 8    | capacity in characters |
//! | 24     | 4    | refcount   |
//! | 28     | 1    | encoding (0 ASCII, 1 UTF-32) |
//! | 29     | 1    | dirty (utf8 cache stale) |
//! | 30     | 2    | padding    |
//! | 32     | 8    | utf8 cache or null |
//!
//! Emitted code never touches these fields; it only moves the pointer and
//! keeps retain/release balanced. `string_retain`, `string_release`, and
//! `array_erase` accept null so zero-initialized slots and fields can be
//! copied and freed unconditionally.
//!
//! # Arrays
//!
//! Arrays are opaque runtime objects; the descriptor slot in emitted code
//! holds one pointer. Element size and kind go in at `array_new`, bounds
//! travel as trailing `(lower, upper)` i64 pairs, storage is row-major,
//! and `array_get_address` returns the element address for the given
//! indices (bounds-checked by the runtime).

// program lifecycle
pub const RUNTIME_INIT: &str = "basic_runtime_init";
pub const RUNTIME_CLEANUP: &str = "basic_runtime_cleanup";

// globals vector
pub const GLOBAL_INIT: &str = "basic_global_init";
pub const GLOBAL_BASE: &str = "basic_global_base";
pub const GLOBAL_CLEANUP: &str = "basic_global_cleanup";

// string descriptors (refcounted; release/erase tolerate null)
pub const STRING_NEW_UTF8: &str = "string_new_utf8";
pub const STRING_RETAIN: &str = "string_retain";
pub const STRING_RELEASE: &str = "string_release";
pub const STRING_CONCAT: &str = "string_concat";
pub const STRING_COMPARE: &str = "string_compare";
pub const STRING_FROM_INT: &str = "string_from_int";
pub const STRING_FROM_DOUBLE: &str = "string_from_double";

// opaque runtime arrays
pub const ARRAY_NEW: &str = "array_new";
pub const ARRAY_GET_ADDRESS: &str = "array_get_address";
pub const ARRAY_REDIM: &str = "array_redim";
pub const ARRAY_ERASE: &str = "array_erase";

// element kind passed to array_new/array_redim so the runtime knows how to
// free and how to zero-fill
pub const ARRAY_ELEM_PLAIN: u32 = 0;
pub const ARRAY_ELEM_STRING: u32 = 1;
pub const ARRAY_ELEM_RECORD: u32 = 2;

// DATA segment
pub const FB_READ_INT: &str = "fb_read_int";
pub const FB_READ_DOUBLE: &str = "fb_read_double";
pub const FB_READ_STRING: &str = "fb_read_string";
pub const FB_RESTORE: &str = "fb_restore";

// console I/O
pub const PRINT_INT: &str = "basic_print_int";
pub const PRINT_DOUBLE: &str = "basic_print_double";
pub const PRINT_STRING: &str = "basic_print_string_desc";
pub const PRINT_USING: &str = "basic_print_using";
pub const PRINT_NEWLINE: &str = "basic_print_newline";
pub const PRINT_TAB: &str = "basic_print_tab";
pub const INPUT_INT: &str = "basic_input_int";
pub const INPUT_DOUBLE: &str = "basic_input_double";
pub const INPUT_STRING: &str = "basic_input_string";

// loop and control checks
pub const FOR_CHECK_STEP: &str = "basic_for_check_step";

// fatal runtime diagnostics (print a message and exit non-zero)
pub const ERROR_GOSUB_OVERFLOW: &str = "basic_error_gosub_overflow";
pub const ERROR_GOSUB_UNDERFLOW: &str = "basic_error_gosub_underflow";
pub const ERROR_TRY_OVERFLOW: &str = "basic_error_try_overflow";
pub const ERROR_UNHANDLED: &str = "basic_error_unhandled";

// C ABI exception plumbing
pub const SETJMP: &str = "setjmp";
pub const LONGJMP: &str = "longjmp";

// exported data items the emitted module defines
pub const DATA_VALUES: &str = "basic_data_values";
pub const DATA_TYPES: &str = "basic_data_types";
pub const DATA_COUNT: &str = "basic_data_count";
pub const ERR_CODE: &str = "basic_err_code";
pub const GOSUB_STACK: &str = "gosub_return_stack";
pub const GOSUB_SP: &str = "gosub_return_sp";
pub const TRY_STACK: &str = "basic_try_stack";
pub const TRY_SP: &str = "basic_try_sp";

/// GOSUB return-id stack capacity, in 32-bit ids.
pub const GOSUB_STACK_DEPTH: u32 = 1000;
/// Nested TRY handler capacity, in jmp_buf pointers.
pub const TRY_STACK_DEPTH: u32 = 256;
/// Bytes reserved per jmp_buf. Generous for every libc we target.
pub const JMP_BUF_SIZE: u32 = 256;

/// Every external symbol the emitter may call, for tooling and tests.
pub static RUNTIME_SYMBOLS: &[&str] = &[
    RUNTIME_INIT,
    RUNTIME_CLEANUP,
    GLOBAL_INIT,
    GLOBAL_BASE,
    GLOBAL_CLEANUP,
    STRING_NEW_UTF8,
    STRING_RETAIN,
    STRING_RELEASE,
    STRING_CONCAT,
    STRING_COMPARE,
    STRING_FROM_INT,
    STRING_FROM_DOUBLE,
    ARRAY_NEW,
    ARRAY_GET_ADDRESS,
    ARRAY_REDIM,
    ARRAY_ERASE,
    FB_READ_INT,
    FB_READ_DOUBLE,
    FB_READ_STRING,
    FB_RESTORE,
    PRINT_INT,
    PRINT_DOUBLE,
    PRINT_STRING,
    PRINT_USING,
    PRINT_NEWLINE,
    PRINT_TAB,
    INPUT_INT,
    INPUT_DOUBLE,
    INPUT_STRING,
    FOR_CHECK_STEP,
    ERROR_GOSUB_OVERFLOW,
    ERROR_GOSUB_UNDERFLOW,
    ERROR_TRY_OVERFLOW,
    ERROR_UNHANDLED,
    SETJMP,
    LONGJMP,
    // reached through the builtin registry
    "string_mid",
    "string_left",
    "string_right",
    "string_instr",
    "string_upper",
    "string_lower",
    "string_trim",
    "string_char_at",
    "string_from_char",
    "string_to_double",
    "array_lbound",
    "array_ubound",
];
