//! Rendering the resolved surface as the compat header the module build
//! includes.
//!
//! The header carries one `#define` per capability flag and, for each
//! symbol whose owning flag resolved absent, the shim definition. Present
//! flags contribute the define only; the native definition stays the one
//! visible to the consumer.

use crate::registry::BindingSource;
use crate::surface::Surface;

const GUARD: &str = "KCOMPAT_FEATURE_H";

/// Render the complete header text for a bound surface.
pub fn render_header(surface: &Surface) -> String {
    let mut out = String::new();

    out.push_str("/*\n");
    out.push_str(" * kern_feature.h - generated by kcompat; do not edit.\n");
    match surface.config().kernel() {
        Some(kernel) => out.push_str(&format!(" * target kernel: {kernel}\n")),
        None => out.push_str(" * target kernel: unknown (conservative defaults)\n"),
    }
    if let Some(variant) = surface.config().variant() {
        out.push_str(&format!(" * distribution: {variant}\n"));
    }
    out.push_str(" */\n\n");

    out.push_str(&format!("#ifndef {GUARD}\n"));
    out.push_str(&format!("#define {GUARD}\n\n"));
    out.push_str("#include <linux/version.h>\n\n");

    // Guard against a header generated for one kernel being picked up by
    // a build against another.
    if let Some(kernel) = surface.config().kernel() {
        out.push_str(&format!(
            "#define KCOMPAT_TARGET_VERSION_CODE 0x{:06x}\n",
            kernel.code()
        ));
        out.push_str("#if LINUX_VERSION_CODE != KCOMPAT_TARGET_VERSION_CODE\n");
        out.push_str(
            "#warning \"kcompat: header was generated for a different kernel release\"\n",
        );
        out.push_str("#endif\n\n");
    }

    for (cap, value, _) in surface.config().iter() {
        let defined = if value.is_present() { 1 } else { 0 };
        out.push_str(&format!("#define {} {}\n", cap.macro_name(), defined));
    }

    for binding in surface.bindings() {
        if binding.source != BindingSource::Polyfill {
            continue;
        }
        out.push_str(&format!(
            "\n/* {} shim ({}; {} absent on this kernel) */\n",
            binding.symbol.name,
            binding.symbol.kind,
            binding.symbol.owner.name()
        ));
        out.push_str(binding.symbol.polyfill);
    }

    out.push_str(&format!("\n#endif /* {GUARD} */\n"));
    out
}
