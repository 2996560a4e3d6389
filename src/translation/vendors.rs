// src/translation/vendors.rs - built-in translators keyed by printer type id
use super::dlp::EmberTranslator;
use super::factory::{TranslatorFactory, TranslatorType};
use super::fdm::{
    delta, makerbot, printrbot, FamilyState, FdmHooks, FdmTranslator, GcodeWriter,
    OutputContainer, WriterDefaults,
};
use super::format::to_fixed;
use super::{TranslationError, Translator, TranslatorContext};
use printmgr_shared::{FdmCommand, Material, PrinterProfile, PrinterType};
use std::sync::Arc;

pub const DREMEL_IDEA_BUILDER: &str = "3F64F6EC-A1DF-44AB-A22E-58C036F2F474";
pub const ULTIMAKER_2: &str = "8D39294C-FA7A-40F4-AB79-19F506C64097";
pub const TYPE_A_SERIES_1: &str = "F2F4B9B6-1D54-4A16-883E-B0385F27380C";
pub const MAKERBOT_REPLICATOR_2: &str = "F2F4B9B6-1D54-4A16-883E-B0385F27380D";
pub const PRINTRBOT_PLAY: &str = "8D586473-C1A9-451B-A129-2425357C6428";
pub const PRINTRBOT_SIMPLE: &str = "152A72A1-45C7-11E5-B970-0800200C9A66";
pub const PRINTRBOT_PLUS: &str = "8301C8D0-7A59-4F4B-A918-D5D38888790F";
pub const DREAMMAKER_OVERLORD: &str = "4A0F7523-071B-4F1E-A527-9DA49AECB807";
pub const OCEAN_FARM1: &str = "FA1118E1-7A59-FF4B-B938-D4D37788792F";
pub const AUTODESK_EMBER: &str = "7FAF097F-DB2E-45DC-9395-A30210E789AA";

/// An FDM translator bound to one printer type id.
pub struct FdmVendor<S> {
    pub name: &'static str,
    pub printer_type_id: &'static str,
    pub hooks: fn() -> FdmHooks<S>,
    pub defaults: fn() -> WriterDefaults,
    pub container: OutputContainer,
}

impl<S: FamilyState> TranslatorType for FdmVendor<S> {
    fn name(&self) -> &str {
        self.name
    }

    fn can_translate(
        &self,
        printer_type: &PrinterType,
        _profile: Option<&PrinterProfile>,
        _material: Option<&Material>,
    ) -> bool {
        printer_type.id == self.printer_type_id
    }

    fn create(&self, context: TranslatorContext) -> Result<Box<dyn Translator>, TranslationError> {
        Ok(Box::new(FdmTranslator::new(
            (self.hooks)(),
            (self.defaults)(),
            self.container,
            &context,
        )))
    }
}

pub struct EmberVendor;

impl TranslatorType for EmberVendor {
    fn name(&self) -> &str {
        "Autodesk-Ember"
    }

    fn can_translate(
        &self,
        printer_type: &PrinterType,
        _profile: Option<&PrinterProfile>,
        _material: Option<&Material>,
    ) -> bool {
        printer_type.id == AUTODESK_EMBER
    }

    fn create(&self, context: TranslatorContext) -> Result<Box<dyn Translator>, TranslationError> {
        Ok(Box::new(EmberTranslator::new(&context)))
    }
}

fn marlin_vendor(name: &'static str, printer_type_id: &'static str) -> FdmVendor<()> {
    FdmVendor {
        name,
        printer_type_id,
        hooks: FdmHooks::marlin,
        defaults: WriterDefaults::default,
        container: OutputContainer::Plain,
    }
}

fn printrbot_vendor(
    name: &'static str,
    printer_type_id: &'static str,
) -> FdmVendor<printrbot::PrintrbotState> {
    FdmVendor {
        name,
        printer_type_id,
        hooks: printrbot::hooks,
        defaults: WriterDefaults::default,
        container: OutputContainer::Plain,
    }
}

fn delta_vendor(name: &'static str, printer_type_id: &'static str) -> FdmVendor<delta::DeltaState> {
    FdmVendor {
        name,
        printer_type_id,
        hooks: delta::hooks,
        defaults: WriterDefaults::default,
        container: OutputContainer::Plain,
    }
}

pub fn dremel_hooks() -> FdmHooks<()> {
    FdmHooks {
        convert_set_temp_nozzle: dremel_set_temp_nozzle,
        convert_set_temp_bed: dremel_set_temp_bed,
        convert_estimates: dremel_estimates,
        post_process_line: dremel_post_process_line,
        ..FdmHooks::marlin()
    }
}

fn dremel_set_temp_nozzle(
    w: &mut GcodeWriter<()>,
    cmd: &mut FdmCommand,
) -> Result<String, TranslationError> {
    let mut line = format!("M104 S{} T0", to_fixed(cmd.nozzle_temp, w.precision.s));
    if cmd.wait {
        line += "\r\nM6 T0";
    }
    Ok(w.post_process_line(cmd, line))
}

fn dremel_set_temp_bed(
    w: &mut GcodeWriter<()>,
    cmd: &mut FdmCommand,
) -> Result<String, TranslationError> {
    let line = format!("M140 S{}", to_fixed(cmd.bed_temp, w.precision.s));
    Ok(w.post_process_line(cmd, line))
}

fn dremel_estimates(
    w: &mut GcodeWriter<()>,
    cmd: &mut FdmCommand,
) -> Result<String, TranslationError> {
    w.estimates.print_time = cmd.estimated_print_time;
    w.estimates.material_length = cmd.estimated_material_length;
    Ok(String::new())
}

/// Dremel firmware wants CRLF line endings. Per-command comments are not appended.
fn dremel_post_process_line(_w: &GcodeWriter<()>, _cmd: &FdmCommand, mut line: String) -> String {
    if !line.is_empty() {
        line.push_str("\r\n");
    }
    line
}

/// Registers every built-in translator in lookup order.
pub fn register_builtin(factory: &mut TranslatorFactory) {
    factory.register(Arc::new(FdmVendor {
        name: "Dremel",
        printer_type_id: DREMEL_IDEA_BUILDER,
        hooks: dremel_hooks,
        defaults: WriterDefaults::default,
        container: OutputContainer::G3drem,
    }));
    factory.register(Arc::new(marlin_vendor("Ultimaker", ULTIMAKER_2)));
    factory.register(Arc::new(marlin_vendor("TypeA", TYPE_A_SERIES_1)));
    factory.register(Arc::new(FdmVendor {
        name: "Replicator2",
        printer_type_id: MAKERBOT_REPLICATOR_2,
        hooks: makerbot::hooks,
        defaults: makerbot::defaults,
        container: OutputContainer::Plain,
    }));
    factory.register(Arc::new(printrbot_vendor("Printrbot-Play", PRINTRBOT_PLAY)));
    factory.register(Arc::new(printrbot_vendor("Printrbot-Simple", PRINTRBOT_SIMPLE)));
    factory.register(Arc::new(printrbot_vendor("Printrbot-Plus", PRINTRBOT_PLUS)));
    factory.register(Arc::new(delta_vendor("DreamMaker-OverLord", DREAMMAKER_OVERLORD)));
    factory.register(Arc::new(delta_vendor("Ocean-Farm1", OCEAN_FARM1)));
    factory.register(Arc::new(EmberVendor));
}
