use inkwell::{
    builder::Builder,
    context::Context,
    module::Module,
    types::BasicMetadataTypeEnum,
    values::{BasicMetadataValueEnum, FloatValue, FunctionValue},
    FloatPredicate,
};

use super::{Backend, BackendError};

fn builder_error(err: inkwell::builder::BuilderError) -> BackendError {
    BackendError::Builder(err.to_string())
}

pub struct LlvmBackend<'a> {
    pub context: &'a Context,
    pub module: Module<'a>,
    pub builder: Builder<'a>,
}

impl<'a> LlvmBackend<'a> {
    pub fn new(context: &'a Context, name: &str) -> LlvmBackend<'a> {
        let module = context.create_module(name);
        let builder = context.create_builder();

        LlvmBackend {
            context,
            module,
            builder,
        }
    }
}

impl<'a> Backend for LlvmBackend<'a> {
    type Value = FloatValue<'a>;
    type Function = FunctionValue<'a>;

    fn const_float(&mut self, value: f64) -> FloatValue<'a> {
        self.context.f64_type().const_float(value)
    }

    fn get_function(&self, name: &str) -> Option<FunctionValue<'a>> {
        self.module.get_function(name)
    }

    fn add_function(&mut self, name: &str, params: &[String]) -> FunctionValue<'a> {
        let args_types = std::iter::repeat(self.context.f64_type())
            .take(params.len())
            .map(|f| f.into())
            .collect::<Vec<BasicMetadataTypeEnum>>();
        let args_types = args_types.as_slice();

        let fn_type = self.context.f64_type().fn_type(args_types, false);
        let fn_val = self.module.add_function(name, fn_type, None);
        self.set_param_names(fn_val, params);
        fn_val
    }

    fn set_param_names(&mut self, function: FunctionValue<'a>, params: &[String]) {
        for (arg, name) in function.get_param_iter().zip(params) {
            arg.into_float_value().set_name(name.as_str());
        }
    }

    fn count_params(&self, function: FunctionValue<'a>) -> usize {
        function.count_params() as usize
    }

    fn params(&self, function: FunctionValue<'a>) -> Vec<FloatValue<'a>> {
        function
            .get_param_iter()
            .map(|arg| arg.into_float_value())
            .collect()
    }

    fn has_body(&self, function: FunctionValue<'a>) -> bool {
        function.count_basic_blocks() > 0
    }

    fn position_at_entry(&mut self, function: FunctionValue<'a>) -> Result<(), BackendError> {
        let entry = self.context.append_basic_block(function, "entry");
        self.builder.position_at_end(entry);
        Ok(())
    }

    fn build_add(
        &mut self,
        lhs: FloatValue<'a>,
        rhs: FloatValue<'a>,
    ) -> Result<FloatValue<'a>, BackendError> {
        self.builder
            .build_float_add(lhs, rhs, "addtmp")
            .map_err(builder_error)
    }

    fn build_sub(
        &mut self,
        lhs: FloatValue<'a>,
        rhs: FloatValue<'a>,
    ) -> Result<FloatValue<'a>, BackendError> {
        self.builder
            .build_float_sub(lhs, rhs, "subtmp")
            .map_err(builder_error)
    }

    fn build_mul(
        &mut self,
        lhs: FloatValue<'a>,
        rhs: FloatValue<'a>,
    ) -> Result<FloatValue<'a>, BackendError> {
        self.builder
            .build_float_mul(lhs, rhs, "multmp")
            .map_err(builder_error)
    }

    fn build_less_than(
        &mut self,
        lhs: FloatValue<'a>,
        rhs: FloatValue<'a>,
    ) -> Result<FloatValue<'a>, BackendError> {
        let cmp = self
            .builder
            .build_float_compare(FloatPredicate::ULT, lhs, rhs, "cmptmp")
            .map_err(builder_error)?;
        self.builder
            .build_unsigned_int_to_float(cmp, self.context.f64_type(), "booltmp")
            .map_err(builder_error)
    }

    fn build_call(
        &mut self,
        function: FunctionValue<'a>,
        args: &[FloatValue<'a>],
    ) -> Result<FloatValue<'a>, BackendError> {
        let argsv: Vec<BasicMetadataValueEnum> = args.iter().map(|&val| val.into()).collect();

        self.builder
            .build_call(function, argsv.as_slice(), "calltmp")
            .map_err(builder_error)?
            .try_as_basic_value()
            .left()
            .map(|value| value.into_float_value())
            .ok_or_else(|| BackendError::Builder("call produced no value".to_string()))
    }

    fn build_return(&mut self, value: FloatValue<'a>) -> Result<(), BackendError> {
        self.builder
            .build_return(Some(&value))
            .map_err(builder_error)?;
        Ok(())
    }

    fn verify(&self, function: FunctionValue<'a>) -> bool {
        function.verify(true)
    }

    fn clear_body(&mut self, function: FunctionValue<'a>) {
        for block in function.get_basic_blocks() {
            // Only fails for blocks without a parent, which these all have.
            let _ = unsafe { block.delete() };
        }
    }

    fn delete_function(&mut self, function: FunctionValue<'a>) {
        unsafe {
            function.delete();
        }
    }

    fn function_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut next = self.module.get_first_function();
        while let Some(function) = next {
            names.push(function.get_name().to_string_lossy().into_owned());
            next = function.get_next_function();
        }
        names
    }

    fn print_function(&self, function: FunctionValue<'a>) -> String {
        function.print_to_string().to_string()
    }

    fn print_module(&self) -> String {
        self.module.print_to_string().to_string()
    }
}
