use super::doc_comment;
use crate::{
    oparg::{AliasType, NamedType, Transform},
    pipeline::GeneratedModel,
    table::IntWidth,
};

fn alias(out: &mut String, ty: &AliasType, error: &str) {
    let name = &ty.name;
    let width = ty.width;

    doc_comment(out, "", ty.doc.as_deref());
    emit!(out, "#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]");
    emit!(out, "#[repr(transparent)]");
    emit!(out, "pub struct {name}(pub {width});");
    emit!(out);
    emit!(out, "impl {name} {{");
    emit!(out, "    #[must_use]");
    emit!(out, "    pub const fn new(value: {width}) -> Self {{");
    emit!(out, "        Self(value)");
    emit!(out, "    }}");
    emit!(out);
    emit!(out, "    #[must_use]");
    emit!(out, "    pub const fn get(self) -> {width} {{");
    emit!(out, "        self.0");
    emit!(out, "    }}");
    emit!(out, "}}");
    emit!(out);
    emit!(out, "impl TryFrom<u32> for {name} {{");
    emit!(out, "    type Error = {error};");
    emit!(out);
    emit!(out, "    fn try_from(raw: u32) -> Result<Self, Self::Error> {{");
    if width == IntWidth::U32 {
        emit!(out, "        Ok(Self(raw))");
    } else {
        emit!(
            out,
            "        {width}::try_from(raw).map(Self).map_err(|_| {error}::InvalidOperand)"
        );
    }
    emit!(out, "    }}");
    emit!(out, "}}");
    emit!(out);
    emit!(out, "impl From<{name}> for u32 {{");
    emit!(out, "    fn from(value: {name}) -> Self {{");
    if width == IntWidth::U32 {
        emit!(out, "        value.0");
    } else {
        emit!(out, "        u32::from(value.0)");
    }
    emit!(out, "    }}");
    emit!(out, "}}");
    emit!(out);
}

pub(super) fn aliases(model: &GeneratedModel, out: &mut String) {
    for ty in model.registry.aliases() {
        alias(out, ty, &model.config.error_type);
    }
}

fn named(out: &mut String, ty: &NamedType, error: &str) {
    let name = &ty.name;

    doc_comment(out, "", ty.doc.as_deref());
    emit!(out, "#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]");
    emit!(out, "#[repr(u32)]");
    emit!(out, "pub enum {name} {{");
    for variant in &ty.variants {
        doc_comment(out, "    ", variant.doc.as_deref());
        emit!(out, "    {} = {},", variant.name, variant.value);
    }
    emit!(out, "}}");
    emit!(out);
    emit!(out, "impl TryFrom<u32> for {name} {{");
    emit!(out, "    type Error = {error};");
    emit!(out);
    emit!(out, "    fn try_from(raw: u32) -> Result<Self, Self::Error> {{");
    emit!(out, "        match raw {{");
    for variant in &ty.variants {
        emit!(out, "            {} => Ok(Self::{}),", variant.value, variant.name);
    }
    emit!(out, "            _ => Err({error}::InvalidOperand),");
    emit!(out, "        }}");
    emit!(out, "    }}");
    emit!(out, "}}");
    emit!(out);
    emit!(out, "impl From<{name}> for u32 {{");
    emit!(out, "    fn from(value: {name}) -> Self {{");
    emit!(out, "        value as u32");
    emit!(out, "    }}");
    emit!(out, "}}");
    emit!(out);
}

pub(super) fn named_types(model: &GeneratedModel, out: &mut String) {
    for ty in model.registry.named() {
        named(out, ty, &model.config.error_type);
    }
}

fn conversion(out: &mut String, from: &NamedType, to: &NamedType) {
    emit!(out, "impl From<{}> for {} {{", from.name, to.name);
    emit!(out, "    fn from(value: {}) -> Self {{", from.name);
    emit!(out, "        match value {{");
    for variant in &from.variants {
        emit!(
            out,
            "            {}::{} => Self::{},",
            from.name, variant.name, variant.name
        );
    }
    emit!(out, "        }}");
    emit!(out, "    }}");
    emit!(out, "}}");
    emit!(out);
}

/// Lossless conversions between a derived type and its base, both directions.
pub(super) fn derived_conversions(model: &GeneratedModel, out: &mut String) {
    for derived in model.registry.named() {
        let Some(derivation) = &derived.derivation else {
            continue;
        };
        let Some(base) = model
            .registry
            .get(&derivation.base)
            .and_then(|ty| ty.as_named())
        else {
            continue;
        };

        let Transform::ShiftLeft(bits) = derivation.transform;
        emit!(
            out,
            "// `{}` encodes `{}` shifted left by {bits} bits.",
            derived.name, base.name
        );
        conversion(out, base, derived);
        conversion(out, derived, base);
    }
}
